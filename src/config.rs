use std::time::Duration;

use crate::media::clock::MasterClock;

/// Byte capacity of the audio packet queue.
pub const DEFAULT_AUDIO_QUEUE_CAPACITY: usize = 5 * 16 * 1024;
/// Byte capacity of the video packet queue.
pub const DEFAULT_VIDEO_QUEUE_CAPACITY: usize = 5 * 256 * 1024;

/// Tunables for the pipeline as a whole.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub audio_queue_capacity: usize,
    pub video_queue_capacity: usize,
    pub master: MasterClock,
    /// How long the reader sleeps between stop/seek checks once the source hit EOF.
    pub eof_idle: Duration,
    /// Upper bound on how long `stop()` waits for a reader stuck inside the demuxer.
    pub reader_join_timeout: Duration,
    pub sync: SyncConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            audio_queue_capacity: DEFAULT_AUDIO_QUEUE_CAPACITY,
            video_queue_capacity: DEFAULT_VIDEO_QUEUE_CAPACITY,
            master: MasterClock::default(),
            eof_idle: Duration::from_millis(100),
            reader_join_timeout: Duration::from_millis(500),
            sync: SyncConfig::default(),
        }
    }
}

/// Constants of the drift correction algorithms. All times are milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Differences at or beyond this are treated as discontinuities, not drift.
    pub nosync_threshold_ms: i64,
    pub min_sync_threshold_ms: i64,
    /// Frame-to-frame delays at or above this are implausible and ignored.
    pub max_frame_delay_ms: i64,
    /// Lowest delay the refresh timer is ever armed with after showing a frame.
    pub refresh_floor_ms: i64,
    /// Re-arm delay when the picture slot is empty.
    pub starved_poll_ms: i64,
    /// Re-arm delay while paused.
    pub paused_poll_ms: i64,
    /// Number of audio diffs accumulated before correction starts.
    pub audio_diff_avg_nb: u32,
    pub sample_correction_percent_max: usize,
    /// Size of one hardware audio buffer in sample frames.
    pub hw_buffer_samples: u32,
    pub framedrop: bool,
    /// Consecutive late frames before one is dropped.
    pub framedrop_streak: u32,
    /// Used when the stream does not advertise a frame rate.
    pub default_frame_duration_ms: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            nosync_threshold_ms: 10_000,
            min_sync_threshold_ms: 10,
            max_frame_delay_ms: 2_000,
            refresh_floor_ms: 10,
            starved_poll_ms: 1,
            paused_poll_ms: 10,
            audio_diff_avg_nb: 20,
            sample_correction_percent_max: 10,
            hw_buffer_samples: 1024,
            framedrop: true,
            framedrop_streak: 3,
            default_frame_duration_ms: 40,
        }
    }
}
