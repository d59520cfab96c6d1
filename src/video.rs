pub mod decoder;
pub mod worker;

use bytes::Bytes;

/// Pixel layout of a decoded picture. Conversion for display is the host's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Yuv420p,
    Nv12,
    Rgba,
    Other,
}

#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Bytes,
    pub linesize: usize,
}

/// What a video decoder hands back for one packet.
#[derive(Debug, Clone)]
pub struct Picture {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
    /// Decoder-supplied timestamp in the stream time base.
    pub pts: Option<i64>,
    /// Timestamp of the packet that started this picture, threaded through the decoder.
    pub packet_pts: Option<i64>,
    /// Extra half-frame periods this picture should be shown for.
    pub repeat_pict: u32,
}

impl Picture {
    pub fn new(width: u32, height: u32, format: PixelFormat, planes: Vec<Plane>) -> Self {
        Self {
            width,
            height,
            format,
            planes,
            pts: None,
            packet_pts: None,
            repeat_pict: 0,
        }
    }
}

/// A picture with its presentation time resolved, travelling through the picture slot.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub picture: Picture,
    pub pts: i64,
    /// Filled in by the scheduler just before the frame is handed to the host.
    pub delay_ms: i64,
    /// First frame after a seek; presentation timing starts over.
    pub discontinuity: bool,
    /// Seek serial of the packet the picture was decoded from.
    pub serial: u64,
}
