use std::sync::Arc;

use tracing::{debug, info_span, trace, warn};

use crate::audio::decoder::AudioDecoder;
use crate::audio::player::AudioSink;
use crate::audio::{AudioFrame, AudioSpec};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::media::clock::{GlobalClock, MasterClock};
use crate::media::demuxer::StreamInfo;
use crate::media::packet::QueueEntry;
use crate::media::reader::PacketQueue;
use crate::media::sync::AudioSync;

/// Decodes audio packets and feeds the sink, publishing the audio clock as it goes.
pub struct AudioWorker {
    queue: Arc<PacketQueue>,
    decoder: Box<dyn AudioDecoder>,
    sink: Box<dyn AudioSink>,
    clock: GlobalClock,
    info: StreamInfo,
    spec: AudioSpec,
    sync: AudioSync,
    /// End of the last frame handed to the sink, in ms.
    audio_clock: Option<i64>,
    serial: u64,
}

impl AudioWorker {
    pub fn new(
        queue: Arc<PacketQueue>,
        decoder: Box<dyn AudioDecoder>,
        sink: Box<dyn AudioSink>,
        clock: GlobalClock,
        info: StreamInfo,
        config: &SyncConfig,
    ) -> Self {
        let spec = decoder.spec();
        Self {
            queue,
            decoder,
            sink,
            clock,
            info,
            spec,
            sync: AudioSync::new(spec, config),
            audio_clock: None,
            serial: 0,
        }
    }

    pub fn run(mut self) {
        let _span = info_span!("audio_decoder").entered();
        loop {
            let entry = match self.queue.pop() {
                Ok(entry) => entry,
                Err(_) => break,
            };
            let frames: Vec<AudioFrame> = match entry {
                QueueEntry::Packet(packet) => {
                    self.serial = packet.serial;
                    match self.decoder.decode(&packet) {
                        Ok(frame) => frame.into_iter().collect(),
                        Err(e) => {
                            warn!("dropping audio packet: {e}");
                            continue;
                        }
                    }
                }
                QueueEntry::Flush => {
                    trace!("flushing audio decoder");
                    self.decoder.flush();
                    self.sync.reset();
                    self.audio_clock = None;
                    continue;
                }
                QueueEntry::Eof => self.decoder.drain().unwrap_or_else(|e| {
                    warn!("audio drain failed: {e}");
                    Vec::new()
                }),
            };
            for frame in frames {
                match self.play(frame) {
                    Ok(()) => {}
                    Err(Error::Interrupted) => {
                        debug!("audio decoder stopped");
                        return;
                    }
                    Err(e) => warn!("audio write failed: {e}"),
                }
            }
        }
        debug!("audio decoder stopped");
    }

    fn play(&mut self, mut frame: AudioFrame) -> Result<()> {
        if self.serial != self.clock.serial() {
            trace!(serial = self.serial, "skipping audio from before seek");
            return Ok(());
        }
        let pts = frame
            .pts
            .map(|ts| self.info.time_base.to_ms(ts))
            .or(self.audio_clock)
            .unwrap_or(0);
        let duration = self.spec.duration_ms(frame.size());

        // what the listener hears once everything already queued has played
        let audible = pts - self.sink.latency_ms();
        if self.clock.master() != MasterClock::Audio {
            let diff = audible - self.clock.reference();
            let before = frame.size();
            let after = self.sync.synchronize(&mut frame, diff);
            if after != before {
                trace!(diff, before, after, "corrected audio frame");
            }
        }

        if !self.clock.publish_audio(self.serial, audible) {
            // a seek landed after the check above
            return Ok(());
        }
        self.sink.write(&frame)?;
        self.audio_clock = Some(pts + duration);
        Ok(())
    }
}
