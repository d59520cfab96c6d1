use bytes::Bytes;

use crate::media::queue::Payload;

/// Which elementary stream a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Audio,
    Video,
    Subtitle,
    Unknown,
}

/// Rational time base of a stream, e.g. 1/90000.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    pub const MILLIS: TimeBase = TimeBase { num: 1, den: 1000 };

    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Converts a timestamp in this time base to milliseconds.
    pub fn to_ms(self, ts: i64) -> i64 {
        if self.den == 0 {
            return 0;
        }
        // widen to avoid overflow on 90 kHz streams hours in
        (ts as i128 * self.num as i128 * 1000 / self.den as i128) as i64
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::MILLIS
    }
}

/// One demuxed, still-compressed unit.
#[derive(Debug, Clone)]
pub struct Packet {
    pub kind: PacketKind,
    pub stream_index: usize,
    pub payload: Bytes,
    /// Timestamps in the stream's time base; `None` when the container has none.
    pub dts: Option<i64>,
    pub pts: Option<i64>,
    /// Seek serial the reader stamped on the packet.
    pub serial: u64,
}

impl Packet {
    pub fn new(kind: PacketKind, stream_index: usize, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            stream_index,
            payload: payload.into(),
            dts: None,
            pts: None,
            serial: 0,
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    /// Bytes accounted against the queue capacity.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// What travels through a packet queue.
#[derive(Debug, Clone)]
pub enum QueueEntry {
    Packet(Packet),
    /// Tells the decoder to drop codec state after a seek.
    Flush,
    /// The demuxer ran dry; the decoder should give up what it still holds.
    Eof,
}

impl Payload for QueueEntry {
    fn payload_size(&self) -> usize {
        match self {
            QueueEntry::Packet(packet) => packet.size(),
            QueueEntry::Flush | QueueEntry::Eof => 0,
        }
    }
}
