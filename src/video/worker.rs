use std::sync::Arc;

use tracing::{debug, info_span, trace, warn};

use crate::error::Result;
use crate::media::demuxer::StreamInfo;
use crate::media::packet::QueueEntry;
use crate::media::reader::PacketQueue;
use crate::media::slot::PictureSlot;
use crate::video::decoder::VideoDecoder;
use crate::video::{Picture, VideoFrame};

/// Decodes video packets, stamps each picture with a presentation time and
/// hands it to the presentation thread through the picture slot.
pub struct VideoWorker {
    queue: Arc<PacketQueue>,
    decoder: Box<dyn VideoDecoder>,
    slot: Arc<PictureSlot<VideoFrame>>,
    info: StreamInfo,
    frame_duration_ms: i64,
    /// Predicted pts of the next picture, in ms.
    video_clock: i64,
    discontinuity: bool,
    serial: u64,
}

impl VideoWorker {
    pub fn new(
        queue: Arc<PacketQueue>,
        decoder: Box<dyn VideoDecoder>,
        slot: Arc<PictureSlot<VideoFrame>>,
        info: StreamInfo,
        default_frame_duration_ms: i64,
    ) -> Self {
        Self {
            queue,
            decoder,
            slot,
            info,
            frame_duration_ms: info.frame_duration_ms.unwrap_or(default_frame_duration_ms),
            video_clock: 0,
            discontinuity: true,
            serial: 0,
        }
    }

    pub fn run(mut self) {
        let _span = info_span!("video_decoder").entered();
        while let Ok(entry) = self.queue.pop() {
            let packet = match entry {
                QueueEntry::Packet(packet) => packet,
                QueueEntry::Flush => {
                    trace!("flushing video decoder");
                    self.decoder.flush();
                    self.slot.discard();
                    self.video_clock = 0;
                    self.discontinuity = true;
                    continue;
                }
                QueueEntry::Eof => {
                    let pictures = self.decoder.drain().unwrap_or_else(|e| {
                        warn!("video drain failed: {e}");
                        Vec::new()
                    });
                    trace!(count = pictures.len(), "drained video decoder");
                    if pictures.into_iter().any(|p| self.publish(p).is_err()) {
                        break;
                    }
                    continue;
                }
            };
            self.serial = packet.serial;
            let picture = match self.decoder.decode(&packet) {
                Ok(Some(picture)) => picture,
                Ok(None) => continue,
                Err(e) => {
                    warn!("dropping video packet: {e}");
                    continue;
                }
            };
            if self.publish(picture).is_err() {
                break;
            }
        }
        debug!("video decoder stopped");
    }

    /// Blocks while the slot still holds the previous picture; fails once it is aborted.
    fn publish(&mut self, picture: Picture) -> Result<()> {
        let pts = self.resolve_pts(&picture);
        let frame = VideoFrame {
            picture,
            pts,
            delay_ms: 0,
            discontinuity: std::mem::take(&mut self.discontinuity),
            serial: self.serial,
        };
        self.slot.publish(frame)
    }

    /// Picks the best timestamp available and advances the running video clock.
    fn resolve_pts(&mut self, picture: &Picture) -> i64 {
        let pts = picture
            .pts
            .or(picture.packet_pts)
            .map(|ts| self.info.time_base.to_ms(ts))
            .unwrap_or(self.video_clock);
        // each repeat adds half a frame period
        let frame_delay =
            self.frame_duration_ms + picture.repeat_pict as i64 * self.frame_duration_ms / 2;
        self.video_clock = pts + frame_delay;
        pts
    }
}
