//! The demux thread: reads packets, routes them to the per-stream queues and
//! carries out seeks.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, info_span, trace, warn};

use crate::error::{Error, Result};
use crate::media::demuxer::{Demuxer, StreamMap};
use crate::media::packet::{Packet, PacketKind, QueueEntry};
use crate::media::queue::BoundedQueue;

pub type PacketQueue = BoundedQueue<QueueEntry>;

#[derive(Default)]
struct ControlState {
    stop: bool,
    /// Target in ms and the serial the controller started for it.
    seek: Option<(i64, u64)>,
    eof: bool,
}

/// Requests posted to the reader by the controller.
#[derive(Default)]
pub struct ReaderControl {
    state: Mutex<ControlState>,
    wake: Condvar,
}

impl ReaderControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.state.lock().stop = true;
        self.wake.notify_all();
    }

    /// Replaces any seek still pending. Packets read after the seek carry `serial`.
    pub fn request_seek(&self, target_ms: i64, serial: u64) {
        self.state.lock().seek = Some((target_ms, serial));
        self.wake.notify_all();
    }

    pub fn is_stopping(&self) -> bool {
        self.state.lock().stop
    }

    /// The demuxer ran dry and no seek has been requested since.
    pub fn reached_eof(&self) -> bool {
        let state = self.state.lock();
        state.eof && state.seek.is_none()
    }

    fn take_seek(&self) -> Option<(i64, u64)> {
        self.state.lock().seek.take()
    }

    fn set_eof(&self, eof: bool) {
        self.state.lock().eof = eof;
    }

    /// Sleeps up to `timeout` unless a stop or seek is already pending.
    fn idle(&self, timeout: Duration) {
        let mut state = self.state.lock();
        if state.stop || state.seek.is_some() {
            return;
        }
        self.wake.wait_for(&mut state, timeout);
    }
}

pub struct ReaderWorker {
    demuxer: Box<dyn Demuxer>,
    streams: StreamMap,
    audio: Option<Arc<PacketQueue>>,
    video: Option<Arc<PacketQueue>>,
    control: Arc<ReaderControl>,
    eof_idle: Duration,
    serial: u64,
}

impl ReaderWorker {
    pub fn new(
        demuxer: Box<dyn Demuxer>,
        streams: StreamMap,
        audio: Option<Arc<PacketQueue>>,
        video: Option<Arc<PacketQueue>>,
        control: Arc<ReaderControl>,
        eof_idle: Duration,
    ) -> Self {
        Self {
            demuxer,
            streams,
            audio,
            video,
            control,
            eof_idle,
            serial: 0,
        }
    }

    pub fn run(mut self) {
        let _span = info_span!("reader").entered();
        let mut at_eof = false;
        loop {
            if self.control.is_stopping() {
                break;
            }
            if let Some((target, serial)) = self.control.take_seek() {
                match self.seek(target, serial) {
                    Ok(()) => at_eof = false,
                    Err(Error::Interrupted) => break,
                    Err(e) => error!("seek to {target} ms failed: {e}"),
                }
            }
            if at_eof {
                // keep the thread alive so the controller's join never races a finished read
                self.control.idle(self.eof_idle);
                continue;
            }
            let packet = match self.demuxer.read_packet() {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    info!("end of stream");
                    at_eof = true;
                    if self.mark_eof().is_err() {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    error!("read failed, treating as end of stream: {e}");
                    at_eof = true;
                    if self.mark_eof().is_err() {
                        break;
                    }
                    continue;
                }
            };
            if self.dispatch(packet).is_err() {
                debug!("queue aborted, reader exiting");
                break;
            }
        }
        debug!("reader stopped");
    }

    fn dispatch(&self, mut packet: Packet) -> Result<()> {
        packet.kind = self.streams.classify(&packet);
        packet.serial = self.serial;
        let queue = match packet.kind {
            PacketKind::Audio => self.audio.as_ref(),
            PacketKind::Video => self.video.as_ref(),
            PacketKind::Subtitle | PacketKind::Unknown => None,
        };
        match queue {
            Some(queue) => queue.push(QueueEntry::Packet(packet)),
            None => {
                trace!(stream = packet.stream_index, kind = ?packet.kind, "dropping packet");
                Ok(())
            }
        }
    }

    /// Tells each decoder to drain, then reports EOF to the controller.
    fn mark_eof(&self) -> Result<()> {
        for queue in [self.audio.as_ref(), self.video.as_ref()].into_iter().flatten() {
            queue.push(QueueEntry::Eof)?;
        }
        self.control.set_eof(true);
        Ok(())
    }

    fn seek(&mut self, target_ms: i64, serial: u64) -> Result<()> {
        info!(target_ms, serial, "seeking");
        match self.demuxer.seek(target_ms) {
            Ok(()) => {}
            Err(e) => {
                warn!("demuxer refused seek: {e}");
                return Err(e);
            }
        }
        self.serial = serial;
        self.control.set_eof(false);
        for queue in [self.audio.as_ref(), self.video.as_ref()].into_iter().flatten() {
            queue.flush();
            queue.push(QueueEntry::Flush)?;
        }
        Ok(())
    }
}
