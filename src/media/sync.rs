//! Drift correction for the slave streams.
//!
//! Both halves are plain state machines fed with millisecond timestamps. Each
//! one is owned by a single thread: [`AudioSync`] by the audio decoder,
//! [`VideoSync`] by whoever runs the refresh timer.

use crate::audio::{AudioFrame, AudioSpec};
use crate::config::SyncConfig;

/// Exponentially weighted audio drift filter plus sample-count correction.
#[derive(Debug, Clone)]
pub struct AudioSync {
    diff_cum: f64,
    avg_coef: f64,
    avg_count: u32,
    avg_nb: u32,
    diff_threshold_ms: f64,
    nosync_threshold_ms: i64,
    max_percent: usize,
    sample_rate: u32,
    bytes_per_frame: usize,
}

impl AudioSync {
    pub fn new(spec: AudioSpec, config: &SyncConfig) -> Self {
        let avg_nb = config.audio_diff_avg_nb.max(1);
        // weight of a sample decays to 1% after `avg_nb` updates
        let avg_coef = (0.01f64.ln() / avg_nb as f64).exp();
        let diff_threshold_ms = if spec.sample_rate == 0 {
            0.0
        } else {
            2.0 * config.hw_buffer_samples as f64 * 1000.0 / spec.sample_rate as f64
        };
        Self {
            diff_cum: 0.0,
            avg_coef,
            avg_count: 0,
            avg_nb,
            diff_threshold_ms,
            nosync_threshold_ms: config.nosync_threshold_ms,
            max_percent: config.sample_correction_percent_max,
            sample_rate: spec.sample_rate,
            bytes_per_frame: spec.bytes_per_frame(),
        }
    }

    pub fn reset(&mut self) {
        self.diff_cum = 0.0;
        self.avg_count = 0;
    }

    pub fn diff_threshold_ms(&self) -> f64 {
        self.diff_threshold_ms
    }

    /// Feeds one drift observation and returns the byte size a buffer of
    /// `size` bytes should be stretched or squeezed to.
    ///
    /// `diff_ms` is the audio position minus the reference clock. The result
    /// is always within `max_percent` of `size` and a whole number of sample
    /// frames, or exactly `size` when no correction applies.
    pub fn wanted_size(&mut self, size: usize, diff_ms: i64) -> usize {
        if diff_ms.abs() >= self.nosync_threshold_ms {
            // a seek or a broken timestamp, not drift
            self.reset();
            return size;
        }

        self.diff_cum = diff_ms as f64 + self.avg_coef * self.diff_cum;
        if self.avg_count < self.avg_nb {
            self.avg_count += 1;
            return size;
        }

        let avg_diff = self.diff_cum * (1.0 - self.avg_coef);
        if avg_diff.abs() < self.diff_threshold_ms {
            return size;
        }

        let bpf = self.bytes_per_frame;
        if bpf == 0 || size < bpf {
            return size;
        }

        let frames = diff_ms * self.sample_rate as i64 / 1000;
        let wanted = size as i64 + frames * bpf as i64;

        let min = (size * (100 - self.max_percent.min(100))).div_ceil(100).div_ceil(bpf) * bpf;
        let max = size * (100 + self.max_percent) / 100 / bpf * bpf;
        if min > max {
            // too short to move by a whole sample frame within the bound
            return size;
        }
        let wanted = wanted.clamp(min as i64, max as i64) as usize;
        wanted / bpf * bpf
    }

    /// Shrinks or grows `frame` in place toward the reference clock.
    ///
    /// Growing repeats the trailing sample frame; pitch is never changed.
    pub fn synchronize(&mut self, frame: &mut AudioFrame, diff_ms: i64) -> usize {
        let size = frame.size();
        let wanted = self.wanted_size(size, diff_ms);
        if wanted < size {
            frame.samples.truncate(wanted);
        } else if wanted > size {
            let bpf = self.bytes_per_frame;
            let last = frame.samples[size - bpf..size].to_vec();
            frame.samples.reserve(wanted - size);
            while frame.samples.len() < wanted {
                frame.samples.extend_from_slice(&last);
            }
        }
        frame.size()
    }
}

/// Outcome of one refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Frame delay after the sync adjustment.
    pub delay_ms: i64,
    /// What the refresh timer should actually be armed with.
    pub actual_delay_ms: i64,
    /// Frame pts minus the reference clock.
    pub diff_ms: i64,
    /// The frame is late enough, for long enough, to be dropped.
    pub skip: bool,
}

/// Picture timing state of the presentation side.
#[derive(Debug, Clone)]
pub struct VideoSync {
    last_pts: Option<i64>,
    last_delay: i64,
    timer: Option<i64>,
    late_streak: u32,
    config: SyncConfig,
}

impl VideoSync {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            last_pts: None,
            last_delay: config.default_frame_duration_ms,
            timer: None,
            late_streak: 0,
            config,
        }
    }

    pub fn reset(&mut self) {
        self.last_pts = None;
        self.last_delay = self.config.default_frame_duration_ms;
        self.timer = None;
        self.late_streak = 0;
    }

    pub fn last_pts(&self) -> Option<i64> {
        self.last_pts
    }

    /// Computes how long the frame with `pts` should stay on screen.
    ///
    /// `reference` is the master clock; pass `adjust = false` when video is
    /// itself the master and only the nominal frame delay applies.
    pub fn compute(&mut self, pts: i64, reference: i64, adjust: bool) -> Schedule {
        let mut delay = match self.last_pts {
            Some(last) => pts - last,
            None => self.last_delay,
        };
        if delay <= 0 || delay >= self.config.max_frame_delay_ms {
            delay = self.last_delay;
        }
        self.last_delay = delay;
        self.last_pts = Some(pts);

        let diff = pts - reference;
        let sync_threshold = delay.max(self.config.min_sync_threshold_ms);
        if adjust {
            delay = adjust_delay(delay, diff, sync_threshold, self.config.nosync_threshold_ms);
        }

        let mut timer = match self.timer {
            Some(timer) if (timer - reference).abs() < self.config.nosync_threshold_ms => timer,
            _ => reference,
        };
        timer += delay;
        self.timer = Some(timer);

        let mut actual_delay = timer - reference;
        let below_floor = actual_delay < self.config.refresh_floor_ms;
        if below_floor {
            actual_delay = self.config.refresh_floor_ms;
        }

        let late =
            adjust && diff <= -sync_threshold && diff.abs() < self.config.nosync_threshold_ms;
        self.late_streak = if late { self.late_streak + 1 } else { 0 };
        let skip = self.config.framedrop
            && below_floor
            && self.late_streak >= self.config.framedrop_streak.max(1);
        if skip {
            self.late_streak = 0;
        }

        Schedule {
            delay_ms: delay,
            actual_delay_ms: actual_delay,
            diff_ms: diff,
            skip,
        }
    }
}

/// Applies the late/early rule to a nominal frame delay.
///
/// A frame `sync_threshold` or more behind the reference is shown at once, one
/// that far ahead is held for twice as long. Differences beyond `nosync` are
/// left alone.
pub fn adjust_delay(delay: i64, diff: i64, sync_threshold: i64, nosync: i64) -> i64 {
    if diff.abs() >= nosync {
        return delay;
    }
    if diff <= -sync_threshold {
        0
    } else if diff >= sync_threshold {
        2 * delay
    } else {
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleFormat;

    fn stereo_s16(sample_rate: u32) -> AudioSpec {
        AudioSpec {
            sample_rate,
            channels: 2,
            format: SampleFormat::S16,
        }
    }

    fn warm(sync: &mut AudioSync, size: usize, diff: i64) {
        for _ in 0..SyncConfig::default().audio_diff_avg_nb {
            assert_eq!(sync.wanted_size(size, diff), size);
        }
    }

    #[test]
    fn test_audio_pads_with_trailing_frame() {
        let config = SyncConfig {
            hw_buffer_samples: 8,
            nosync_threshold_ms: 1_000,
            ..SyncConfig::default()
        };
        let mut sync = AudioSync::new(stereo_s16(87), &config);
        assert!(sync.diff_threshold_ms() < 300.0);
        warm(&mut sync, 4096, 300);

        let original: Vec<u8> = (0..4096).map(|i| (i % 251) as u8).collect();
        let mut frame = AudioFrame::new(&original, None);
        assert_eq!(sync.synchronize(&mut frame, 300), 4200);

        assert_eq!(&frame.samples[..4096], &original[..]);
        let trailing = &original[4092..4096];
        for chunk in frame.samples[4096..].chunks(4) {
            assert_eq!(chunk, trailing);
        }
    }

    #[test]
    fn test_audio_truncates_when_ahead_of_reference() {
        let config = SyncConfig {
            hw_buffer_samples: 8,
            ..SyncConfig::default()
        };
        let mut sync = AudioSync::new(stereo_s16(1000), &config);
        warm(&mut sync, 4000, -50);
        let mut frame = AudioFrame::new(vec![7u8; 4000], None);
        // 50 ms at 1 kHz stereo s16 is 200 bytes
        assert_eq!(sync.synchronize(&mut frame, -50), 3800);
        assert!(frame.samples.iter().all(|&b| b == 7));
    }

    #[test]
    fn test_audio_correction_is_bounded() {
        let config = SyncConfig {
            hw_buffer_samples: 1,
            nosync_threshold_ms: 10_000,
            ..SyncConfig::default()
        };
        for &size in &[64usize, 1000, 4096, 17_640] {
            for &diff in &[-9_999i64, -2_000, -120, -3, 0, 3, 120, 2_000, 9_999] {
                let mut sync = AudioSync::new(stereo_s16(44_100), &config);
                for _ in 0..40 {
                    let wanted = sync.wanted_size(size, diff);
                    assert!(wanted * 10 >= size * 9, "size {size} diff {diff} -> {wanted}");
                    assert!(wanted * 10 <= size * 11, "size {size} diff {diff} -> {wanted}");
                    assert_eq!(wanted % 4, 0);
                }
            }
        }
    }

    #[test]
    fn test_audio_below_threshold_is_untouched() {
        let mut sync = AudioSync::new(stereo_s16(48_000), &SyncConfig::default());
        // 2 * 1024 / 48 kHz ~= 42 ms threshold
        for _ in 0..100 {
            assert_eq!(sync.wanted_size(4096, 20), 4096);
        }
    }

    #[test]
    fn test_audio_large_diff_resets_filter() {
        let config = SyncConfig {
            hw_buffer_samples: 8,
            nosync_threshold_ms: 1_000,
            ..SyncConfig::default()
        };
        let mut sync = AudioSync::new(stereo_s16(87), &config);
        warm(&mut sync, 4096, 300);
        assert_eq!(sync.wanted_size(4096, 5_000), 4096);
        // the averaging window starts over
        assert_eq!(sync.wanted_size(4096, 300), 4096);
    }

    #[test]
    fn test_very_late_frame_shows_immediately() {
        assert_eq!(adjust_delay(40, -500, 40, 1_000), 0);
        assert_eq!(adjust_delay(40, 500, 40, 1_000), 80);
        assert_eq!(adjust_delay(40, 10, 40, 1_000), 40);
        assert_eq!(adjust_delay(40, -5_000, 40, 1_000), 40);

        let config = SyncConfig {
            nosync_threshold_ms: 1_000,
            ..SyncConfig::default()
        };
        let mut sync = VideoSync::new(config);
        sync.compute(0, 0, true);
        let schedule = sync.compute(40, 540, true);
        assert_eq!(schedule.diff_ms, -500);
        assert_eq!(schedule.delay_ms, 0);
    }

    #[test]
    fn test_implausible_delay_falls_back() {
        let mut sync = VideoSync::new(SyncConfig::default());
        assert_eq!(sync.compute(1_000, 1_000, true).delay_ms, 40);
        assert_eq!(sync.compute(1_033, 1_033, true).delay_ms, 33);
        // backwards and huge jumps reuse the previous delay
        assert_eq!(sync.compute(1_020, 1_020, true).delay_ms, 33);
        assert_eq!(sync.compute(9_000, 9_000, true).delay_ms, 33);
    }

    #[test]
    fn test_delay_never_below_floor() {
        let config = SyncConfig::default();
        let floor = config.refresh_floor_ms;
        let mut sync = VideoSync::new(config);
        let mut reference = 0;
        for i in 0..200i64 {
            let pts = i * 40;
            // reference wanders around the video position in both directions
            reference += 40 + (i % 7 - 3) * 30;
            let schedule = sync.compute(pts, reference, true);
            assert!(schedule.actual_delay_ms >= floor, "{schedule:?}");
        }
    }

    #[test]
    fn test_sustained_lateness_marks_skip() {
        let config = SyncConfig::default();
        let mut sync = VideoSync::new(config.clone());
        let mut skipped = 0;
        for i in 0..10i64 {
            // video stays 300 ms behind audio
            let schedule = sync.compute(i * 40, i * 40 + 300, true);
            if schedule.skip {
                skipped += 1;
            }
        }
        assert!(skipped > 0);

        let mut no_drop = VideoSync::new(SyncConfig {
            framedrop: false,
            ..config
        });
        for i in 0..10i64 {
            assert!(!no_drop.compute(i * 40, i * 40 + 300, true).skip);
        }
    }

    #[test]
    fn test_in_sync_stream_keeps_frame_rate() {
        let mut sync = VideoSync::new(SyncConfig::default());
        sync.compute(0, 0, true);
        for i in 1..50i64 {
            let schedule = sync.compute(i * 40, i * 40, true);
            assert_eq!(schedule.delay_ms, 40);
            assert_eq!(schedule.actual_delay_ms, 40);
        }
    }
}
