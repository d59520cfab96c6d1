//! Threaded decode and A/V synchronization core for media players.
//!
//! A reader thread demuxes into two byte-bounded packet queues, one decoder
//! thread per stream drains them, audio goes straight to the sink and video
//! through a single picture slot to the presentation thread. The host drives
//! presentation by re-arming a timer with whatever delay [`Player`]'s
//! [`Scheduler::on_fire`] returns.
//!
//! Codecs, containers and audio devices sit behind traits; FFmpeg and cpal
//! implementations are available behind the `ffmpeg` and `cpal` features.

pub mod audio;
pub mod config;
pub mod error;
pub mod media;
pub mod video;

pub use config::{PlayerConfig, SyncConfig};
pub use error::{Error, Result};
pub use media::clock::{GlobalClock, MasterClock};
pub use media::demuxer::{Demuxer, MediaSource, StreamInfo};
pub use media::player::{Player, PlayerState};
pub use media::scheduler::{EventLoop, Scheduler};
pub use video::VideoFrame;
