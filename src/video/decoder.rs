use crate::error::Result;
use crate::media::packet::Packet;
use crate::video::Picture;

/// Turns one compressed packet into at most one picture.
pub trait VideoDecoder: Send {
    fn decode(&mut self, packet: &Packet) -> Result<Option<Picture>>;

    /// Signals end of stream and returns every picture still held back by
    /// reordering. The decoder accepts packets again afterwards.
    fn drain(&mut self) -> Result<Vec<Picture>> {
        Ok(Vec::new())
    }

    /// Drops any reference frames held across packets.
    fn flush(&mut self);
}

#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg_backend::FfmpegVideoDecoder;

#[cfg(feature = "ffmpeg")]
mod ffmpeg_backend {
    use std::collections::VecDeque;

    use bytes::Bytes;
    use ffmpeg_next::{self as ffmpeg, util::frame::Video as FrameVideo};
    use tracing::trace;

    use super::VideoDecoder;
    use crate::error::{Error, Result};
    use crate::media::packet::Packet;
    use crate::video::{Picture, PixelFormat, Plane};

    pub struct FfmpegVideoDecoder {
        decoder: ffmpeg::codec::decoder::Video,
        pending: VecDeque<Picture>,
    }

    impl FfmpegVideoDecoder {
        pub fn new(stream: &ffmpeg::format::stream::Stream) -> Result<Self> {
            let context_decoder =
                ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
            let decoder = context_decoder
                .decoder()
                .video()
                .map_err(|e| Error::OpenFailed(format!("unsupported video codec: {e}")))?;
            Ok(Self {
                decoder,
                pending: VecDeque::new(),
            })
        }

        fn receive(&mut self, packet_pts: Option<i64>) -> Result<()> {
            let mut decoded = FrameVideo::empty();
            loop {
                match self.decoder.receive_frame(&mut decoded) {
                    Ok(()) => self.pending.push_back(to_picture(&decoded, packet_pts)),
                    Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::sys::EAGAIN => {
                        return Ok(());
                    }
                    Err(ffmpeg::Error::Eof) => return Ok(()),
                    Err(e) => return Err(Error::Decode(e.to_string())),
                }
            }
        }
    }

    impl VideoDecoder for FfmpegVideoDecoder {
        fn decode(&mut self, packet: &Packet) -> Result<Option<Picture>> {
            let mut av_packet = ffmpeg::Packet::copy(&packet.payload);
            av_packet.set_pts(packet.pts);
            av_packet.set_dts(packet.dts);
            self.decoder
                .send_packet(&av_packet)
                .map_err(|e| Error::Decode(e.to_string()))?;
            self.receive(packet.pts)?;
            if self.pending.len() > 1 {
                trace!(pending = self.pending.len(), "decoder produced several pictures");
            }
            Ok(self.pending.pop_front())
        }

        fn drain(&mut self) -> Result<Vec<Picture>> {
            self.decoder
                .send_eof()
                .map_err(|e| Error::Decode(e.to_string()))?;
            let received = self.receive(None);
            let pictures = self.pending.drain(..).collect();
            // back out of draining mode so a later seek can feed packets again
            self.decoder.flush();
            received.map(|()| pictures)
        }

        fn flush(&mut self) {
            self.decoder.flush();
            self.pending.clear();
        }
    }

    fn to_picture(frame: &FrameVideo, packet_pts: Option<i64>) -> Picture {
        let planes = (0..frame.planes())
            .map(|i| Plane {
                data: Bytes::copy_from_slice(frame.data(i)),
                linesize: frame.stride(i),
            })
            .collect();
        let format = match frame.format() {
            ffmpeg::format::Pixel::YUV420P => PixelFormat::Yuv420p,
            ffmpeg::format::Pixel::NV12 => PixelFormat::Nv12,
            ffmpeg::format::Pixel::RGBA => PixelFormat::Rgba,
            _ => PixelFormat::Other,
        };
        let mut picture = Picture::new(frame.width(), frame.height(), format, planes);
        picture.pts = frame.timestamp().or(frame.pts());
        picture.packet_pts = packet_pts;
        picture.repeat_pict = frame.repeat().max(0.0) as u32;
        picture
    }
}
