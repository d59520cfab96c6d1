//! Presentation-side timing: the refresh callback and a host loop that re-arms it.
//!
//! The refresh never runs on a fixed period. Each firing decides how long to
//! wait before the next one, and the host's event loop arms a one-shot timer
//! with that delay.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::media::clock::{GlobalClock, MasterClock};
use crate::media::slot::PictureSlot;
use crate::media::sync::VideoSync;
use crate::video::VideoFrame;

/// A timer callback that returns how long until it wants to fire again.
pub trait Scheduler {
    fn on_fire(&mut self) -> Duration;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub shown: u64,
    pub dropped: u64,
    pub starved: u64,
    /// Pictures decoded before the last seek and thrown away unseen.
    pub stale: u64,
}

/// Pulls pictures out of the slot and times their presentation.
pub struct VideoRefresh {
    slot: Arc<PictureSlot<VideoFrame>>,
    clock: GlobalClock,
    sync: VideoSync,
    config: SyncConfig,
    stats: RefreshStats,
}

impl VideoRefresh {
    pub fn new(slot: Arc<PictureSlot<VideoFrame>>, clock: GlobalClock, config: SyncConfig) -> Self {
        Self {
            slot,
            clock,
            sync: VideoSync::new(config.clone()),
            config,
            stats: RefreshStats::default(),
        }
    }

    pub fn stats(&self) -> RefreshStats {
        self.stats
    }

    /// Forgets picture timing, e.g. after a seek.
    pub fn reset(&mut self) {
        self.sync.reset();
    }

    /// One timer firing. Hands a due picture to `on_frame` and returns the
    /// delay to re-arm with.
    pub fn refresh(&mut self, mut on_frame: impl FnMut(VideoFrame)) -> Duration {
        if self.clock.is_paused() {
            return millis(self.config.paused_poll_ms);
        }
        let Some(mut frame) = self.slot.consume() else {
            // starved, not stalled: poll again shortly
            self.stats.starved += 1;
            return millis(self.config.starved_poll_ms);
        };
        if frame.serial != self.clock.serial() {
            return self.drop_stale(&frame);
        }
        if frame.discontinuity {
            self.sync.reset();
        }

        let adjust = self.clock.master() != MasterClock::Video;
        let schedule = self.sync.compute(frame.pts, self.clock.reference(), adjust);
        frame.delay_ms = schedule.actual_delay_ms;
        if !self.clock.publish_video(frame.serial, frame.pts) {
            // a seek landed while we were timing it
            return self.drop_stale(&frame);
        }

        if schedule.skip {
            trace!(pts = frame.pts, diff = schedule.diff_ms, "dropping late frame");
            self.stats.dropped += 1;
        } else {
            trace!(pts = frame.pts, delay = schedule.actual_delay_ms, "presenting frame");
            self.stats.shown += 1;
            on_frame(frame);
        }
        millis(schedule.actual_delay_ms)
    }

    fn drop_stale(&mut self, frame: &VideoFrame) -> Duration {
        trace!(pts = frame.pts, serial = frame.serial, "dropping frame from before seek");
        self.stats.stale += 1;
        Duration::ZERO
    }
}

fn millis(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

/// Events delivered to the host loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Refresh,
    Quit,
}

/// Asks a running [`EventLoop`] to return.
#[derive(Clone)]
pub struct QuitHandle {
    events: flume::Sender<Event>,
}

impl QuitHandle {
    pub fn quit(&self) {
        let _ = self.events.send(Event::Quit);
    }
}

/// Minimal single-threaded host loop with one timer thread behind it.
///
/// Callbacks always run on the thread that calls [`run_until`](Self::run_until).
pub struct EventLoop {
    events_tx: flume::Sender<Event>,
    events_rx: flume::Receiver<Event>,
    timer_tx: Option<flume::Sender<Instant>>,
    timer: Option<JoinHandle<()>>,
}

impl EventLoop {
    pub fn new() -> Result<Self> {
        let (events_tx, events_rx) = flume::unbounded();
        let (timer_tx, timer_rx) = flume::unbounded::<Instant>();
        let fire = events_tx.clone();
        let timer = thread::Builder::new()
            .name("prism-timer".into())
            .spawn(move || {
                // exits once the loop drops its sender
                for deadline in timer_rx.iter() {
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    }
                    if fire.send(Event::Refresh).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| Error::ResourceExhausted(format!("timer thread: {e}")))?;
        Ok(Self {
            events_tx,
            events_rx,
            timer_tx: Some(timer_tx),
            timer: Some(timer),
        })
    }

    pub fn quit_handle(&self) -> QuitHandle {
        QuitHandle {
            events: self.events_tx.clone(),
        }
    }

    /// Posts a refresh event `delay` from now.
    pub fn schedule_refresh(&self, delay: Duration) {
        if let Some(timer) = self.timer_tx.as_ref() {
            let _ = timer.send(Instant::now() + delay);
        }
    }

    /// Dispatches events to `scheduler` until a quit is posted or `done`
    /// reports true after a firing.
    pub fn run_until<S: Scheduler>(
        &self,
        scheduler: &mut S,
        first_delay: Duration,
        mut done: impl FnMut(&S) -> bool,
    ) {
        self.schedule_refresh(first_delay);
        while let Ok(event) = self.events_rx.recv() {
            match event {
                Event::Refresh => {
                    let next = scheduler.on_fire();
                    if done(&*scheduler) {
                        break;
                    }
                    self.schedule_refresh(next);
                }
                Event::Quit => break,
            }
        }
        // a refresh may still be armed; drop it so a later run starts clean
        self.events_rx.drain();
        debug!("event loop finished");
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.timer_tx.take();
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
    }
}
