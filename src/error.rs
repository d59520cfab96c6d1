use thiserror::Error;

/// Errors surfaced by the pipeline.
///
/// `Interrupted` is the normal exit condition for every blocking wait once the
/// pipeline is shutting down; it is not a failure from the caller's point of view.
#[derive(Debug, Error)]
pub enum Error {
    #[error("operation interrupted by abort")]
    Interrupted,
    #[error("failed to decode packet: {0}")]
    Decode(String),
    #[error("failed to open media: {0}")]
    OpenFailed(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("demux error: {0}")]
    Demux(String),
    #[error("audio device error: {0}")]
    AudioDevice(String),
    #[error("no media is open")]
    NotOpen,
    #[error("invalid player state: {0}")]
    InvalidState(&'static str),
}

impl Error {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Error> for Error {
    fn from(e: ffmpeg_next::Error) -> Self {
        Error::Demux(e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
