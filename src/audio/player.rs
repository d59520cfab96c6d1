//! Audio output devices.
//!
//! An [`AudioOutput`] lives with the controller and owns the device; opening it
//! yields an [`AudioSink`] that the audio decoder thread writes PCM into.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::audio::{AudioFrame, AudioSpec};
use crate::error::{Error, Result};

/// Controller-side handle of an audio device.
pub trait AudioOutput {
    /// Format the device plays natively, if it has one. Decoders convert to it
    /// before the output is opened.
    fn device_spec(&self) -> Result<Option<AudioSpec>> {
        Ok(None)
    }

    fn open(&mut self, spec: AudioSpec) -> Result<Box<dyn AudioSink>>;

    /// Stops consuming samples without closing; writers block once the buffer is full.
    fn pause(&mut self, paused: bool);

    /// Releases the device. Blocked and later writes fail with [`Error::Interrupted`].
    fn close(&mut self);
}

/// Writer half used by the audio decoder thread.
pub trait AudioSink: Send {
    /// Queues `frame` for playback, blocking while the device buffer is full.
    fn write(&mut self, frame: &AudioFrame) -> Result<()>;

    /// Playback time of the samples queued but not yet audible.
    fn latency_ms(&self) -> i64;
}

#[derive(Default)]
struct NullState {
    paused: bool,
    closed: bool,
}

#[derive(Default)]
struct NullShared {
    state: Mutex<NullState>,
    changed: Condvar,
    frames: AtomicU64,
    bytes: AtomicU64,
}

/// Discards audio, optionally pacing writes like a real device would.
#[derive(Clone)]
pub struct NullOutput {
    shared: Arc<NullShared>,
    max_buffered: Option<Duration>,
    device: Option<AudioSpec>,
}

impl NullOutput {
    /// Accepts writes as fast as they come.
    pub fn new() -> Self {
        Self {
            shared: Arc::default(),
            max_buffered: None,
            device: None,
        }
    }

    /// Plays back in real time with up to `max_buffered` of audio queued.
    pub fn paced(max_buffered: Duration) -> Self {
        Self {
            shared: Arc::default(),
            max_buffered: Some(max_buffered),
            device: None,
        }
    }

    /// Pretends to be a device that only plays `spec`.
    pub fn with_device_spec(mut self, spec: AudioSpec) -> Self {
        self.device = Some(spec);
        self
    }

    pub fn frames_written(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.shared.bytes.load(Ordering::Relaxed)
    }
}

impl Default for NullOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for NullOutput {
    fn device_spec(&self) -> Result<Option<AudioSpec>> {
        Ok(self.device)
    }

    fn open(&mut self, spec: AudioSpec) -> Result<Box<dyn AudioSink>> {
        if let Some(device) = self.device.filter(|device| *device != spec) {
            return Err(Error::AudioDevice(format!("device plays {device:?}, got {spec:?}")));
        }
        *self.shared.state.lock() = NullState::default();
        Ok(Box::new(NullSink {
            shared: self.shared.clone(),
            spec,
            max_buffered: self.max_buffered,
            play_until: Instant::now(),
        }))
    }

    fn pause(&mut self, paused: bool) {
        self.shared.state.lock().paused = paused;
        self.shared.changed.notify_all();
    }

    fn close(&mut self) {
        self.shared.state.lock().closed = true;
        self.shared.changed.notify_all();
    }
}

struct NullSink {
    shared: Arc<NullShared>,
    spec: AudioSpec,
    max_buffered: Option<Duration>,
    play_until: Instant,
}

impl AudioSink for NullSink {
    fn write(&mut self, frame: &AudioFrame) -> Result<()> {
        let mut state = self.shared.state.lock();
        loop {
            if state.closed {
                return Err(Error::Interrupted);
            }
            if state.paused {
                self.shared.changed.wait(&mut state);
                continue;
            }
            let Some(max_buffered) = self.max_buffered else {
                break;
            };
            let queued = self.play_until.saturating_duration_since(Instant::now());
            if queued <= max_buffered {
                break;
            }
            self.shared
                .changed
                .wait_for(&mut state, queued - max_buffered);
        }
        drop(state);

        let duration = Duration::from_millis(self.spec.duration_ms(frame.size()) as u64);
        self.play_until = self.play_until.max(Instant::now()) + duration;
        self.shared.frames.fetch_add(1, Ordering::Relaxed);
        self.shared
            .bytes
            .fetch_add(frame.size() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn latency_ms(&self) -> i64 {
        if self.max_buffered.is_none() {
            return 0;
        }
        self.play_until
            .saturating_duration_since(Instant::now())
            .as_millis() as i64
    }
}

#[cfg(feature = "cpal")]
pub use self::cpal_backend::CpalOutput;

#[cfg(feature = "cpal")]
mod cpal_backend {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use ringbuf::{Producer, RingBuffer};
    use tracing::{error, warn};

    use super::{AudioOutput, AudioSink};
    use crate::audio::{AudioFrame, AudioSpec, SampleFormat};
    use crate::error::{Error, Result};

    /// Default output device through cpal, fed from a lock-free ring buffer.
    #[derive(Default)]
    pub struct CpalOutput {
        // the stream must stay alive for as long as audio plays
        stream: Option<cpal::Stream>,
        paused: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
    }

    impl CpalOutput {
        pub fn new() -> Self {
            Self::default()
        }
    }

    fn default_device() -> Result<cpal::Device> {
        cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::AudioDevice("no output device available".into()))
    }

    impl AudioOutput for CpalOutput {
        /// The default device's own rate, downmixed to at most stereo.
        fn device_spec(&self) -> Result<Option<AudioSpec>> {
            let config = default_device()?
                .default_output_config()
                .map_err(|e| Error::AudioDevice(e.to_string()))?;
            if config.sample_format() != cpal::SampleFormat::F32 {
                return Err(Error::AudioDevice(format!(
                    "unsupported device sample format {:?}",
                    config.sample_format()
                )));
            }
            let stream_config: cpal::StreamConfig = config.into();
            Ok(Some(AudioSpec {
                sample_rate: stream_config.sample_rate.0,
                channels: stream_config.channels.min(2),
                format: SampleFormat::F32,
            }))
        }

        fn open(&mut self, spec: AudioSpec) -> Result<Box<dyn AudioSink>> {
            if spec.format != SampleFormat::F32 {
                return Err(Error::AudioDevice(format!(
                    "unsupported sample format {:?}",
                    spec.format
                )));
            }
            let device = default_device()?;
            let config = cpal::StreamConfig {
                channels: spec.channels,
                sample_rate: cpal::SampleRate(spec.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            // roughly 200 ms of interleaved samples
            let capacity = (spec.sample_rate as usize * spec.channels as usize / 5).max(1024);
            let (producer, mut consumer) = RingBuffer::<f32>::new(capacity).split();

            self.paused = Arc::new(AtomicBool::new(false));
            self.closed = Arc::new(AtomicBool::new(false));
            let paused = self.paused.clone();
            let err_fn = |err| error!("an error occurred on stream: {}", err);
            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _| {
                        if paused.load(Ordering::Relaxed) {
                            data.fill(0.0);
                            return;
                        }
                        for sample in data.iter_mut() {
                            *sample = consumer.pop().unwrap_or(0.0);
                        }
                    },
                    err_fn,
                    None::<Duration>,
                )
                .map_err(|e| Error::AudioDevice(e.to_string()))?;
            stream
                .play()
                .map_err(|e| Error::AudioDevice(e.to_string()))?;
            self.stream = Some(stream);

            Ok(Box::new(CpalSink {
                producer,
                closed: self.closed.clone(),
                spec,
                scratch: Vec::new(),
            }))
        }

        fn pause(&mut self, paused: bool) {
            self.paused.store(paused, Ordering::Relaxed);
            if let Some(stream) = self.stream.as_ref() {
                let result = if paused { stream.pause() } else { stream.play() };
                if let Err(e) = result {
                    warn!("failed to toggle audio stream: {e}");
                }
            }
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::Relaxed);
            self.stream.take();
        }
    }

    struct CpalSink {
        producer: Producer<f32>,
        closed: Arc<AtomicBool>,
        spec: AudioSpec,
        scratch: Vec<f32>,
    }

    impl AudioSink for CpalSink {
        fn write(&mut self, frame: &AudioFrame) -> Result<()> {
            self.scratch.clear();
            self.scratch.extend(
                frame
                    .samples
                    .chunks_exact(4)
                    .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
            );
            let mut offset = 0;
            while offset < self.scratch.len() {
                if self.closed.load(Ordering::Relaxed) {
                    return Err(Error::Interrupted);
                }
                let pushed = self.producer.push_slice(&self.scratch[offset..]);
                offset += pushed;
                if pushed == 0 {
                    // device buffer is full; wait for the callback to drain it
                    thread::sleep(Duration::from_millis(4));
                }
            }
            Ok(())
        }

        fn latency_ms(&self) -> i64 {
            let queued_frames = self.producer.len() / self.spec.channels.max(1) as usize;
            queued_frames as i64 * 1000 / self.spec.sample_rate.max(1) as i64
        }
    }
}
