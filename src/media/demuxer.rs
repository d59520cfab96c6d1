use crate::audio::decoder::AudioDecoder;
use crate::error::Result;
use crate::media::packet::{Packet, PacketKind, TimeBase};
use crate::video::decoder::VideoDecoder;

/// Container reader feeding the pipeline.
pub trait Demuxer: Send {
    /// Next packet in container order, or `None` at end of stream.
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// Repositions the source near `target_ms`, at or before it.
    fn seek(&mut self, target_ms: i64) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub index: usize,
    pub time_base: TimeBase,
    /// Nominal duration of one picture, from the stream frame rate.
    pub frame_duration_ms: Option<i64>,
}

impl StreamInfo {
    pub fn new(index: usize, time_base: TimeBase) -> Self {
        Self {
            index,
            time_base,
            frame_duration_ms: None,
        }
    }

    pub fn with_frame_duration(mut self, ms: i64) -> Self {
        self.frame_duration_ms = Some(ms);
        self
    }
}

pub struct AudioStream {
    pub info: StreamInfo,
    pub decoder: Box<dyn AudioDecoder>,
}

pub struct VideoStream {
    pub info: StreamInfo,
    pub decoder: Box<dyn VideoDecoder>,
}

/// Everything `Player::open` needs: the demuxer and a decoder per selected stream.
pub struct MediaSource {
    pub demuxer: Box<dyn Demuxer>,
    pub audio: Option<AudioStream>,
    pub video: Option<VideoStream>,
    pub duration_ms: Option<i64>,
}

impl MediaSource {
    pub fn new(demuxer: impl Demuxer + 'static) -> Self {
        Self {
            demuxer: Box::new(demuxer),
            audio: None,
            video: None,
            duration_ms: None,
        }
    }

    pub fn with_audio(mut self, info: StreamInfo, decoder: impl AudioDecoder + 'static) -> Self {
        self.audio = Some(AudioStream {
            info,
            decoder: Box::new(decoder),
        });
        self
    }

    pub fn with_video(mut self, info: StreamInfo, decoder: impl VideoDecoder + 'static) -> Self {
        self.video = Some(VideoStream {
            info,
            decoder: Box::new(decoder),
        });
        self
    }

    pub fn with_duration(mut self, ms: i64) -> Self {
        self.duration_ms = Some(ms);
        self
    }
}

/// Stream indices the reader routes on.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamMap {
    pub audio: Option<usize>,
    pub video: Option<usize>,
}

impl StreamMap {
    pub fn classify(&self, packet: &Packet) -> PacketKind {
        if self.audio == Some(packet.stream_index) {
            PacketKind::Audio
        } else if self.video == Some(packet.stream_index) {
            PacketKind::Video
        } else if packet.kind == PacketKind::Subtitle {
            PacketKind::Subtitle
        } else {
            PacketKind::Unknown
        }
    }
}

#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg_backend::{FfmpegDemuxer, open_file};

#[cfg(feature = "ffmpeg")]
mod ffmpeg_backend {
    use bytes::Bytes;
    use ffmpeg_next::{self as ffmpeg, media::Type};
    use tracing::{info, warn};

    use super::{Demuxer, MediaSource, StreamInfo};
    use crate::audio::decoder::FfmpegAudioDecoder;
    use crate::error::{Error, Result};
    use crate::media::packet::{Packet, PacketKind, TimeBase};
    use crate::video::decoder::FfmpegVideoDecoder;

    pub struct FfmpegDemuxer {
        ictx: ffmpeg::format::context::Input,
        subtitle_streams: Vec<usize>,
    }

    impl Demuxer for FfmpegDemuxer {
        fn read_packet(&mut self) -> Result<Option<Packet>> {
            let mut av_packet = ffmpeg::Packet::empty();
            match av_packet.read(&mut self.ictx) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
            let index = av_packet.stream();
            let kind = if self.subtitle_streams.contains(&index) {
                PacketKind::Subtitle
            } else {
                PacketKind::Unknown
            };
            let payload = av_packet.data().map(Bytes::copy_from_slice).unwrap_or_default();
            let mut packet = Packet::new(kind, index, payload);
            packet.pts = av_packet.pts();
            packet.dts = av_packet.dts();
            Ok(Some(packet))
        }

        fn seek(&mut self, target_ms: i64) -> Result<()> {
            // without a stream index FFmpeg seeks in AV_TIME_BASE (microseconds)
            let ts = target_ms.saturating_mul(1000);
            self.ictx.seek(ts, ..ts)?;
            Ok(())
        }
    }

    fn time_base(stream: &ffmpeg::format::stream::Stream) -> TimeBase {
        let tb = stream.time_base();
        TimeBase::new(tb.numerator(), tb.denominator())
    }

    /// Opens `path` and picks the best audio and video streams.
    ///
    /// A stream whose codec cannot be opened is skipped; the file only fails
    /// to open when neither kind is decodable.
    pub fn open_file(path: &str) -> Result<MediaSource> {
        let ictx = ffmpeg::format::input(path)
            .map_err(|e| Error::OpenFailed(format!("{path}: {e}")))?;

        let audio = ictx.streams().best(Type::Audio).and_then(|stream| {
            match FfmpegAudioDecoder::new(&stream) {
                Ok(decoder) => Some((StreamInfo::new(stream.index(), time_base(&stream)), decoder)),
                Err(e) => {
                    warn!("skipping audio stream {}: {e}", stream.index());
                    None
                }
            }
        });
        let video = ictx.streams().best(Type::Video).and_then(|stream| {
            match FfmpegVideoDecoder::new(&stream) {
                Ok(decoder) => {
                    let mut info = StreamInfo::new(stream.index(), time_base(&stream));
                    let rate = stream.avg_frame_rate();
                    if rate.numerator() > 0 && rate.denominator() > 0 {
                        info = info.with_frame_duration(
                            1000 * rate.denominator() as i64 / rate.numerator() as i64,
                        );
                    }
                    Some((info, decoder))
                }
                Err(e) => {
                    warn!("skipping video stream {}: {e}", stream.index());
                    None
                }
            }
        });
        let subtitle_streams = ictx
            .streams()
            .filter(|s| s.parameters().medium() == Type::Subtitle)
            .map(|s| s.index())
            .collect();
        let duration_ms = (ictx.duration() > 0).then(|| ictx.duration() / 1000);

        if audio.is_none() && video.is_none() {
            return Err(Error::OpenFailed(format!(
                "{path}: no decodable audio or video stream"
            )));
        }
        info!(
            path,
            audio = audio.is_some(),
            video = video.is_some(),
            duration_ms,
            "opened media"
        );

        let mut source = MediaSource::new(FfmpegDemuxer {
            ictx,
            subtitle_streams,
        });
        if let Some((info, decoder)) = audio {
            source = source.with_audio(info, decoder);
        }
        if let Some((info, decoder)) = video {
            source = source.with_video(info, decoder);
        }
        if let Some(ms) = duration_ms {
            source = source.with_duration(ms);
        }
        Ok(source)
    }
}
