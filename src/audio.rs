pub mod decoder;
pub mod player;
pub mod worker;

use bytes::BytesMut;

/// Interleaved sample encoding handed to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    S16,
    F32,
}

impl SampleFormat {
    pub fn bytes(self) -> usize {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

/// Parameters the audio sink is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

impl AudioSpec {
    /// Size of one sample for every channel.
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.format.bytes()
    }

    pub fn bytes_per_sec(&self) -> usize {
        self.bytes_per_frame() * self.sample_rate as usize
    }

    /// Playback time of `bytes` of PCM.
    pub fn duration_ms(&self, bytes: usize) -> i64 {
        let per_sec = self.bytes_per_sec();
        if per_sec == 0 {
            return 0;
        }
        (bytes as u128 * 1000 / per_sec as u128) as i64
    }
}

/// A block of decoded, interleaved PCM.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: BytesMut,
    /// Decoder-supplied timestamp in the stream time base.
    pub pts: Option<i64>,
}

impl AudioFrame {
    pub fn new(samples: impl AsRef<[u8]>, pts: Option<i64>) -> Self {
        Self {
            samples: BytesMut::from(samples.as_ref()),
            pts,
        }
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }
}
