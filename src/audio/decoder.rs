use crate::audio::{AudioFrame, AudioSpec};
use crate::error::{Error, Result};
use crate::media::packet::Packet;

/// Turns one compressed packet into at most one block of interleaved PCM.
pub trait AudioDecoder: Send {
    /// Format of every frame this decoder yields.
    fn spec(&self) -> AudioSpec;

    /// Makes every later frame come out in `target`, typically the format the
    /// output device runs at. A decoder that cannot convert only accepts its
    /// own format.
    fn convert_to(&mut self, target: AudioSpec) -> Result<()> {
        let spec = self.spec();
        if target == spec {
            Ok(())
        } else {
            Err(Error::AudioDevice(format!("cannot convert {spec:?} to {target:?}")))
        }
    }

    fn decode(&mut self, packet: &Packet) -> Result<Option<AudioFrame>>;

    /// Signals end of stream and returns whatever the codec still buffers.
    fn drain(&mut self) -> Result<Vec<AudioFrame>> {
        Ok(Vec::new())
    }

    fn flush(&mut self);
}

#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg_backend::FfmpegAudioDecoder;

#[cfg(feature = "ffmpeg")]
mod ffmpeg_backend {
    use bytes::BytesMut;
    use ffmpeg_next::{
        self as ffmpeg,
        channel_layout::ChannelLayout,
        format::{Sample, sample::Type},
        software::resampling,
        util::frame::Audio as FrameAudio,
    };
    use tracing::debug;

    use super::AudioDecoder;
    use crate::audio::{AudioFrame, AudioSpec, SampleFormat};
    use crate::error::{Error, Result};
    use crate::media::packet::Packet;

    /// Room for whatever the resampler's delay line holds at end of stream.
    const RESAMPLER_TAIL: usize = 4096;

    struct Resampler(resampling::Context);

    // SAFETY: the context is created and driven only by whichever thread owns
    // the decoder; it is never shared.
    unsafe impl Send for Resampler {}

    /// Wraps an FFmpeg audio decoder and resamples its output to packed f32
    /// at the target rate and channel count.
    pub struct FfmpegAudioDecoder {
        decoder: ffmpeg::codec::decoder::Audio,
        spec: AudioSpec,
        /// Built from the first decoded frame, since only that knows the real input layout.
        resampler: Option<Resampler>,
    }

    impl FfmpegAudioDecoder {
        pub fn new(stream: &ffmpeg::format::stream::Stream) -> Result<Self> {
            let context_decoder =
                ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
            let decoder = context_decoder
                .decoder()
                .audio()
                .map_err(|e| Error::OpenFailed(format!("unsupported audio codec: {e}")))?;
            let channels = (decoder.ch_layout().channels() as u16).min(2);
            let spec = AudioSpec {
                sample_rate: decoder.rate(),
                channels,
                format: SampleFormat::F32,
            };
            if spec.sample_rate == 0 || spec.channels == 0 {
                return Err(Error::OpenFailed("audio stream has no sample rate or channels".into()));
            }
            Ok(Self {
                decoder,
                spec,
                resampler: None,
            })
        }

        /// Receives every frame the codec has ready, resampled and concatenated.
        fn receive(&mut self, fallback_pts: Option<i64>) -> Result<Option<AudioFrame>> {
            let mut out: Option<AudioFrame> = None;
            let mut decoded = FrameAudio::empty();
            loop {
                match self.decoder.receive_frame(&mut decoded) {
                    Ok(()) => {
                        let pcm = self.resample(&decoded)?;
                        match out.as_mut() {
                            Some(frame) => frame.samples.extend_from_slice(&pcm),
                            None => {
                                out = Some(AudioFrame {
                                    samples: pcm,
                                    pts: decoded.timestamp().or(decoded.pts()).or(fallback_pts),
                                })
                            }
                        }
                    }
                    Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::sys::EAGAIN => break,
                    Err(ffmpeg::Error::Eof) => break,
                    Err(e) => return Err(Error::Decode(e.to_string())),
                }
            }
            Ok(out)
        }

        fn resample(&mut self, frame: &FrameAudio) -> Result<BytesMut> {
            if self.resampler.is_none() {
                self.resampler = Some(self.open_resampler(frame)?);
            }
            let mut resampled = FrameAudio::empty();
            if let Some(resampler) = self.resampler.as_mut() {
                resampler
                    .0
                    .run(frame, &mut resampled)
                    .map_err(|e| Error::Decode(format!("resampling failed: {e}")))?;
            }
            Ok(packed(&resampled, self.spec))
        }

        fn open_resampler(&self, frame: &FrameAudio) -> Result<Resampler> {
            let mut in_layout = frame.channel_layout();
            if in_layout.is_empty() {
                in_layout = layout_for(frame.channels());
            }
            let context = resampling::Context::get(
                frame.format(),
                in_layout,
                frame.rate(),
                Sample::F32(Type::Packed),
                layout_for(self.spec.channels),
                self.spec.sample_rate,
            )
            .map_err(|e| Error::Decode(format!("cannot create resampler: {e}")))?;
            debug!(
                from_rate = frame.rate(),
                to_rate = self.spec.sample_rate,
                channels = self.spec.channels,
                "audio resampler ready"
            );
            Ok(Resampler(context))
        }
    }

    impl AudioDecoder for FfmpegAudioDecoder {
        fn spec(&self) -> AudioSpec {
            self.spec
        }

        fn convert_to(&mut self, target: AudioSpec) -> Result<()> {
            if target.format != SampleFormat::F32 || !(1..=2).contains(&target.channels) {
                return Err(Error::AudioDevice(format!("cannot resample to {target:?}")));
            }
            self.spec = target;
            self.resampler = None;
            Ok(())
        }

        fn decode(&mut self, packet: &Packet) -> Result<Option<AudioFrame>> {
            let mut av_packet = ffmpeg::Packet::copy(&packet.payload);
            av_packet.set_pts(packet.pts);
            av_packet.set_dts(packet.dts);
            self.decoder
                .send_packet(&av_packet)
                .map_err(|e| Error::Decode(e.to_string()))?;
            // a packet may hold several codec frames
            self.receive(packet.pts)
        }

        fn drain(&mut self) -> Result<Vec<AudioFrame>> {
            self.decoder
                .send_eof()
                .map_err(|e| Error::Decode(e.to_string()))?;
            let mut frames: Vec<AudioFrame> = self.receive(None)?.into_iter().collect();
            if let Some(resampler) = self.resampler.as_mut() {
                let mut tail = FrameAudio::new(
                    Sample::F32(Type::Packed),
                    RESAMPLER_TAIL,
                    layout_for(self.spec.channels),
                );
                if resampler.0.flush(&mut tail).is_ok() && tail.samples() > 0 {
                    frames.push(AudioFrame {
                        samples: packed(&tail, self.spec),
                        pts: None,
                    });
                }
            }
            self.flush();
            Ok(frames)
        }

        fn flush(&mut self) {
            self.decoder.flush();
            // its delay line holds samples from before the flush
            self.resampler = None;
        }
    }

    fn layout_for(channels: u16) -> ChannelLayout {
        match channels {
            1 => ChannelLayout::MONO,
            2 => ChannelLayout::STEREO,
            _ => ChannelLayout::STEREO_DOWNMIX,
        }
    }

    /// Copies the valid part of a packed frame; plane 0 may carry alignment padding.
    fn packed(frame: &FrameAudio, spec: AudioSpec) -> BytesMut {
        let data = frame.data(0);
        let len = (frame.samples() * spec.bytes_per_frame()).min(data.len());
        BytesMut::from(&data[..len])
    }
}
