//! The controller: owns every queue, thread and clock of one open source.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::audio::player::AudioOutput;
use crate::audio::worker::AudioWorker;
use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::media::clock::{GlobalClock, MasterClock};
use crate::media::demuxer::{MediaSource, StreamMap};
use crate::media::reader::{PacketQueue, ReaderControl, ReaderWorker};
use crate::media::scheduler::{RefreshStats, Scheduler, VideoRefresh};
use crate::media::slot::PictureSlot;
use crate::video::VideoFrame;
use crate::video::worker::VideoWorker;

/// Lifecycle of the pipeline. Pause is a sub-state of `Playing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Opening,
    Playing,
    Stopping,
}

/// Threads and shared state of one open source.
///
/// Dropping it aborts every queue and the picture slot, then joins the
/// workers, so a half-built pipeline unwinds itself.
struct Pipeline {
    clock: GlobalClock,
    control: Arc<ReaderControl>,
    audio_queue: Option<Arc<PacketQueue>>,
    video_queue: Option<Arc<PacketQueue>>,
    slot: Arc<PictureSlot<VideoFrame>>,
    refresh: VideoRefresh,
    duration_ms: Option<i64>,
    reader: Option<JoinHandle<()>>,
    reader_done: Option<flume::Receiver<()>>,
    reader_join_timeout: Duration,
    audio: Option<JoinHandle<()>>,
    video: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Wakes every blocked worker. Idempotent.
    fn abort(&self) {
        self.control.request_stop();
        for queue in [self.audio_queue.as_ref(), self.video_queue.as_ref()]
            .into_iter()
            .flatten()
        {
            queue.abort();
        }
        self.slot.abort();
    }

    fn join(&mut self) {
        // decoders first: they are the consumers of the aborted queues
        for (name, handle) in [("audio", self.audio.take()), ("video", self.video.take())] {
            let panicked = handle.is_some_and(|h| h.join().is_err());
            if panicked {
                warn!("{name} decoder thread panicked");
            }
        }

        let Some(reader) = self.reader.take() else {
            return;
        };
        let finished = match self.reader_done.take() {
            // the sender lives as long as the reader thread, so disconnect means it exited
            Some(done) => !matches!(
                done.recv_timeout(self.reader_join_timeout),
                Err(flume::RecvTimeoutError::Timeout)
            ),
            None => true,
        };
        if finished {
            if reader.join().is_err() {
                warn!("reader thread panicked");
            }
        } else {
            warn!(
                timeout_ms = self.reader_join_timeout.as_millis() as u64,
                "reader stuck in demuxer, detaching it"
            );
        }
    }

    fn is_finished(&self) -> bool {
        self.control.reached_eof()
            && [self.audio_queue.as_ref(), self.video_queue.as_ref()]
                .into_iter()
                .flatten()
                .all(|queue| queue.is_drained())
            && !self.slot.is_ready()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.abort();
        self.join();
    }
}

fn spawn(name: &str, f: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("prism-{name}"))
        .spawn(f)
        .map_err(|e| Error::ResourceExhausted(format!("{name} thread: {e}")))
}

/// Plays one [`MediaSource`] at a time.
///
/// Calls must be serialized by the caller; the player lives on the thread that
/// runs the presentation loop and is driven from there through [`Scheduler`].
pub struct Player {
    config: PlayerConfig,
    output: Box<dyn AudioOutput>,
    on_frame: Box<dyn FnMut(VideoFrame)>,
    pipeline: Option<Pipeline>,
    state: PlayerState,
}

impl Player {
    pub fn new(
        config: PlayerConfig,
        output: Box<dyn AudioOutput>,
        on_frame: impl FnMut(VideoFrame) + 'static,
    ) -> Self {
        Self {
            config,
            output,
            on_frame: Box::new(on_frame),
            pipeline: None,
            state: PlayerState::Idle,
        }
    }

    /// Starts the pipeline for `source`, paused.
    ///
    /// Any pipeline already running is stopped first. On failure nothing is
    /// left running and the player is back to `Idle`.
    pub fn open(&mut self, source: MediaSource) -> Result<()> {
        self.stop();
        self.state = PlayerState::Opening;
        match self.start(source) {
            Ok(pipeline) => {
                self.pipeline = Some(pipeline);
                self.state = PlayerState::Playing;
                Ok(())
            }
            Err(e) => {
                self.output.close();
                self.state = PlayerState::Idle;
                Err(e)
            }
        }
    }

    fn start(&mut self, source: MediaSource) -> Result<Pipeline> {
        let MediaSource {
            demuxer,
            audio,
            video,
            duration_ms,
        } = source;
        if audio.is_none() && video.is_none() {
            return Err(Error::OpenFailed("no audio or video stream".into()));
        }

        let master = match self.config.master {
            MasterClock::Audio if audio.is_none() => MasterClock::External,
            MasterClock::Video if video.is_none() => MasterClock::External,
            master => master,
        };
        let clock = GlobalClock::new(master);
        // preroll: queues fill while the clock stands still
        clock.pause();

        let control = Arc::new(ReaderControl::new());
        let slot = Arc::new(PictureSlot::new());
        let audio_queue = audio
            .as_ref()
            .map(|_| Arc::new(PacketQueue::new(self.config.audio_queue_capacity)));
        let video_queue = video
            .as_ref()
            .map(|_| Arc::new(PacketQueue::new(self.config.video_queue_capacity)));
        let streams = StreamMap {
            audio: audio.as_ref().map(|s| s.info.index),
            video: video.as_ref().map(|s| s.info.index),
        };

        let mut pipeline = Pipeline {
            clock: clock.clone(),
            control: control.clone(),
            audio_queue: audio_queue.clone(),
            video_queue: video_queue.clone(),
            slot: slot.clone(),
            refresh: VideoRefresh::new(slot.clone(), clock.clone(), self.config.sync.clone()),
            duration_ms,
            reader: None,
            reader_done: None,
            reader_join_timeout: self.config.reader_join_timeout,
            audio: None,
            video: None,
        };

        let audio = match (audio, audio_queue.clone()) {
            (Some(mut stream), Some(queue)) => {
                let spec = match self.output.device_spec()? {
                    Some(device) => {
                        stream.decoder.convert_to(device)?;
                        device
                    }
                    None => stream.decoder.spec(),
                };
                debug!(?spec, "opening audio output");
                let sink = self.output.open(spec)?;
                self.output.pause(true);
                Some(AudioWorker::new(
                    queue,
                    stream.decoder,
                    sink,
                    clock.clone(),
                    stream.info,
                    &self.config.sync,
                ))
            }
            _ => None,
        };

        if let (Some(stream), Some(queue)) = (video, video_queue.clone()) {
            let worker = VideoWorker::new(
                queue,
                stream.decoder,
                slot,
                stream.info,
                self.config.sync.default_frame_duration_ms,
            );
            pipeline.video = Some(spawn("video", move || worker.run())?);
        }

        let (done_tx, done_rx) = flume::bounded::<()>(1);
        let reader = ReaderWorker::new(
            demuxer,
            streams,
            audio_queue,
            video_queue,
            control,
            self.config.eof_idle,
        );
        pipeline.reader = Some(spawn("reader", move || {
            let _done = done_tx;
            reader.run();
        })?);
        pipeline.reader_done = Some(done_rx);

        // spawned last: a worker blocked on the paused device is only woken by
        // closing the output, which the unwinding drop cannot do
        if let Some(worker) = audio {
            pipeline.audio = Some(spawn("audio", move || worker.run())?);
        }

        info!(
            ?master,
            audio = pipeline.audio.is_some(),
            video = pipeline.video.is_some(),
            duration_ms,
            "pipeline started"
        );
        Ok(pipeline)
    }

    pub fn play(&mut self) -> Result<()> {
        let pipeline = self.pipeline.as_ref().ok_or(Error::NotOpen)?;
        pipeline.clock.resume();
        self.output.pause(false);
        debug!("playing");
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        let pipeline = self.pipeline.as_ref().ok_or(Error::NotOpen)?;
        pipeline.clock.pause();
        self.output.pause(true);
        debug!("paused");
        Ok(())
    }

    pub fn toggle(&mut self) -> Result<()> {
        if self.is_paused() {
            self.play()
        } else {
            self.pause()
        }
    }

    /// Tears the pipeline down. Always returns, even when the demuxer is stuck.
    pub fn stop(&mut self) {
        let Some(mut pipeline) = self.pipeline.take() else {
            return;
        };
        self.state = PlayerState::Stopping;
        pipeline.abort();
        // wakes an audio worker blocked inside the device write
        self.output.close();
        pipeline.join();
        drop(pipeline);
        self.state = PlayerState::Idle;
        info!("pipeline stopped");
    }

    /// Jumps to `seconds`, clamped to the source duration when it is known.
    pub fn seek(&mut self, seconds: f64) -> Result<()> {
        if !seconds.is_finite() {
            return Err(Error::InvalidState("seek target is not a finite number"));
        }
        let pipeline = self.pipeline.as_mut().ok_or(Error::NotOpen)?;
        let mut target_ms = (seconds * 1000.0).max(0.0) as i64;
        if let Some(duration) = pipeline.duration_ms {
            target_ms = target_ms.min(duration);
        }
        // everything decoded from here on under the old serial is dropped unseen
        let serial = pipeline.clock.seek(target_ms);
        for queue in [pipeline.audio_queue.as_ref(), pipeline.video_queue.as_ref()]
            .into_iter()
            .flatten()
        {
            // unblocks a reader stuck pushing into a full queue
            queue.flush();
        }
        pipeline.control.request_seek(target_ms, serial);
        pipeline.slot.discard();
        pipeline.refresh.reset();
        debug!(target_ms, serial, "seek requested");
        Ok(())
    }

    /// Source duration in seconds, or 0 when unknown.
    pub fn duration(&self) -> f64 {
        self.pipeline
            .as_ref()
            .and_then(|p| p.duration_ms)
            .map_or(0.0, |ms| ms as f64 / 1000.0)
    }

    /// Current position on the reference clock, in seconds.
    pub fn position(&self) -> f64 {
        self.pipeline
            .as_ref()
            .map_or(0.0, |p| p.clock.reference() as f64 / 1000.0)
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.pipeline.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.pipeline.as_ref().is_none_or(|p| p.clock.is_paused())
    }

    /// The source is exhausted and everything read from it has been consumed.
    pub fn is_finished(&self) -> bool {
        self.pipeline.as_ref().is_some_and(Pipeline::is_finished)
    }

    pub fn refresh_stats(&self) -> RefreshStats {
        self.pipeline
            .as_ref()
            .map(|p| p.refresh.stats())
            .unwrap_or_default()
    }
}

impl Scheduler for Player {
    fn on_fire(&mut self) -> Duration {
        let on_frame = &mut self.on_frame;
        match self.pipeline.as_mut() {
            Some(pipeline) => pipeline.refresh.refresh(|frame| on_frame(frame)),
            None => Duration::from_millis(self.config.sync.paused_poll_ms.max(0) as u64),
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}
