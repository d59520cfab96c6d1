#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use prism_sync::audio::decoder::AudioDecoder;
use prism_sync::audio::{AudioFrame, AudioSpec, SampleFormat};
use prism_sync::media::packet::{Packet, PacketKind, TimeBase};
use prism_sync::video::decoder::VideoDecoder;
use prism_sync::video::{Picture, PixelFormat};
use prism_sync::{Demuxer, MediaSource, Result, StreamInfo};

pub const VIDEO_INDEX: usize = 0;
pub const AUDIO_INDEX: usize = 1;
pub const FRAME_MS: i64 = 40;
pub const AUDIO_CHUNK_MS: i64 = 20;

/// 1 kHz mono s16: 2 bytes per millisecond.
pub const SPEC: AudioSpec = AudioSpec {
    sample_rate: 1000,
    channels: 1,
    format: SampleFormat::S16,
};

/// Serves a fixed packet list in millisecond time base and seeks within it.
pub struct ScriptedDemuxer {
    all: Vec<Packet>,
    pending: VecDeque<Packet>,
    pub seeks: Arc<Mutex<Vec<i64>>>,
}

impl ScriptedDemuxer {
    pub fn new(all: Vec<Packet>) -> Self {
        Self {
            pending: all.iter().cloned().collect(),
            all,
            seeks: Arc::default(),
        }
    }
}

impl Demuxer for ScriptedDemuxer {
    fn read_packet(&mut self) -> Result<Option<Packet>> {
        Ok(self.pending.pop_front())
    }

    fn seek(&mut self, target_ms: i64) -> Result<()> {
        self.seeks.lock().push(target_ms);
        self.pending = self
            .all
            .iter()
            .filter(|p| p.pts.is_some_and(|pts| pts >= target_ms))
            .cloned()
            .collect();
        Ok(())
    }
}

/// Never returns from `read_packet` and ignores every request.
pub struct StuckDemuxer;

impl Demuxer for StuckDemuxer {
    fn read_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            thread::sleep(Duration::from_secs(3600));
        }
    }

    fn seek(&mut self, _target_ms: i64) -> Result<()> {
        Ok(())
    }
}

/// Produces an endless stream of video packets.
#[derive(Default)]
pub struct EndlessDemuxer {
    next_pts: i64,
}

impl Demuxer for EndlessDemuxer {
    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let pts = self.next_pts;
        self.next_pts += FRAME_MS;
        Ok(Some(
            Packet::new(PacketKind::Unknown, VIDEO_INDEX, vec![0u8; 4096]).with_pts(pts),
        ))
    }

    fn seek(&mut self, target_ms: i64) -> Result<()> {
        self.next_pts = target_ms;
        Ok(())
    }
}

/// Payload bytes are the PCM.
pub struct PcmDecoder;

impl AudioDecoder for PcmDecoder {
    fn spec(&self) -> AudioSpec {
        SPEC
    }

    fn decode(&mut self, packet: &Packet) -> Result<Option<AudioFrame>> {
        Ok(Some(AudioFrame::new(&packet.payload, packet.pts)))
    }

    fn flush(&mut self) {}
}

/// One tiny picture per packet, stamped with the packet pts.
pub struct StampDecoder;

impl VideoDecoder for StampDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<Picture>> {
        let mut picture = Picture::new(2, 2, PixelFormat::Rgba, Vec::new());
        picture.pts = packet.pts;
        Ok(Some(picture))
    }

    fn flush(&mut self) {}
}

/// Like [`StampDecoder`] but a picture only comes out once the next packet
/// arrives, the way B-frame reordering holds pictures back.
#[derive(Default)]
pub struct ReorderingDecoder {
    held: Option<Picture>,
}

impl VideoDecoder for ReorderingDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<Picture>> {
        let mut picture = Picture::new(2, 2, PixelFormat::Rgba, Vec::new());
        picture.pts = packet.pts;
        Ok(self.held.replace(picture))
    }

    fn drain(&mut self) -> Result<Vec<Picture>> {
        Ok(self.held.take().into_iter().collect())
    }

    fn flush(&mut self) {
        self.held = None;
    }
}

/// Interleaved packets covering `duration_ms` of audio and/or video.
pub fn packets(duration_ms: i64, audio: bool, video: bool) -> Vec<Packet> {
    let mut out = Vec::new();
    let mut t = 0;
    while t < duration_ms {
        if video && t % FRAME_MS == 0 {
            out.push(Packet::new(PacketKind::Unknown, VIDEO_INDEX, vec![0u8; 256]).with_pts(t));
        }
        if audio {
            let bytes = (AUDIO_CHUNK_MS * 2) as usize;
            out.push(Packet::new(PacketKind::Unknown, AUDIO_INDEX, vec![0u8; bytes]).with_pts(t));
        }
        t += AUDIO_CHUNK_MS;
    }
    out
}

pub fn source(demuxer: impl Demuxer + 'static, audio: bool, video: bool) -> MediaSource {
    let mut source = MediaSource::new(demuxer);
    if audio {
        source = source.with_audio(StreamInfo::new(AUDIO_INDEX, TimeBase::MILLIS), PcmDecoder);
    }
    if video {
        let info = StreamInfo::new(VIDEO_INDEX, TimeBase::MILLIS).with_frame_duration(FRAME_MS);
        source = source.with_video(info, StampDecoder);
    }
    source
}

pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while !cond() {
        if started.elapsed() > timeout {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
    true
}
