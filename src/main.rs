use std::time::Duration;

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::{Parser, ValueEnum};
use tracing::{debug, error, info};

use prism_sync::audio::player::AudioOutput;
use prism_sync::media::demuxer::open_file;
use prism_sync::{EventLoop, MasterClock, Player, PlayerConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Master {
    Audio,
    Video,
    External,
}

impl From<Master> for MasterClock {
    fn from(m: Master) -> Self {
        match m {
            Master::Audio => MasterClock::Audio,
            Master::Video => MasterClock::Video,
            Master::External => MasterClock::External,
        }
    }
}

/// Headless player: decodes and paces a file in real time, logging presented frames
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the media file to play
    #[arg(short, long)]
    video_path: String,
    /// Clock the other streams synchronize to
    #[arg(short, long, value_enum, default_value_t = Master::Audio)]
    master: Master,
    /// Audio packet queue capacity in bytes
    #[arg(long)]
    audio_queue: Option<usize>,
    /// Video packet queue capacity in bytes
    #[arg(long)]
    video_queue: Option<usize>,
    /// Never drop late frames
    #[arg(long)]
    no_framedrop: bool,
    /// Start position in seconds
    #[arg(short, long)]
    start: Option<f64>,
}

impl Args {
    fn config(&self) -> PlayerConfig {
        let mut config = PlayerConfig {
            master: self.master.into(),
            ..Default::default()
        };
        if let Some(bytes) = self.audio_queue {
            config.audio_queue_capacity = bytes;
        }
        if let Some(bytes) = self.video_queue {
            config.video_queue_capacity = bytes;
        }
        config.sync.framedrop = !self.no_framedrop;
        config
    }
}

#[cfg(feature = "cpal")]
fn audio_output() -> Box<dyn AudioOutput> {
    Box::new(prism_sync::audio::player::CpalOutput::new())
}

#[cfg(not(feature = "cpal"))]
fn audio_output() -> Box<dyn AudioOutput> {
    Box::new(prism_sync::audio::player::NullOutput::paced(
        Duration::from_millis(100),
    ))
}

fn main() {
    let args = Args::parse();
    ffmpeg_next::init().unwrap();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("off,prism_sync=info"))
        .unwrap();
    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let source = match open_file(&args.video_path) {
        Ok(source) => source,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let mut player = Player::new(args.config(), audio_output(), |frame| {
        debug!(
            pts = frame.pts,
            delay = frame.delay_ms,
            width = frame.picture.width,
            height = frame.picture.height,
            "frame ready"
        );
    });
    if let Err(e) = player.open(source) {
        error!("{e}");
        std::process::exit(1);
    }
    if let Some(start) = args.start {
        player.seek(start).unwrap_or_else(|e| error!("seek failed: {e}"));
    }
    player.play().unwrap();
    info!(duration = player.duration(), "playing {}", args.video_path);

    let event_loop = EventLoop::new().unwrap();
    event_loop.run_until(&mut player, Duration::ZERO, Player::is_finished);

    let stats = player.refresh_stats();
    info!(
        position = player.position(),
        shown = stats.shown,
        dropped = stats.dropped,
        stale = stats.stale,
        "playback finished"
    );
    player.stop();
}
