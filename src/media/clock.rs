use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

/// Which stream the others adjust toward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MasterClock {
    #[default]
    Audio,
    Video,
    External,
}

/// A value pinned at some instant and extrapolated in real time from there.
#[derive(Debug, Clone, Copy)]
struct Pinned {
    value_ms: i64,
    at: Instant,
}

impl Pinned {
    fn new(value_ms: i64) -> Self {
        Self {
            value_ms,
            at: Instant::now(),
        }
    }

    fn read(&self, paused: bool) -> i64 {
        if paused {
            self.value_ms
        } else {
            self.value_ms + elapsed_ms(self.at)
        }
    }

    fn freeze(&mut self) {
        self.value_ms += elapsed_ms(self.at);
        self.at = Instant::now();
    }
}

#[derive(Debug)]
struct Inner {
    wall: Pinned,
    audio: Option<Pinned>,
    video: Option<Pinned>,
    paused: bool,
    /// Bumped by every seek; publishes stamped with an older value are ignored.
    serial: u64,
}

/// GlobalClock is the shared playback timeline in milliseconds.
///
/// Decoder threads publish the position of the audio they handed to the sink
/// and the presentation thread publishes the pts of the picture on screen.
/// Readers never wait on a producer; they only take a short read lock.
#[derive(Clone)]
pub struct GlobalClock {
    inner: Arc<RwLock<Inner>>,
    master: MasterClock,
}

impl GlobalClock {
    pub fn new(master: MasterClock) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                wall: Pinned::new(0),
                audio: None,
                video: None,
                paused: false,
                serial: 0,
            })),
            master,
        }
    }

    pub fn master(&self) -> MasterClock {
        self.master
    }

    /// External wall clock, frozen while paused.
    pub fn now(&self) -> i64 {
        let i = self.inner.read();
        i.wall.read(i.paused)
    }

    pub fn audio(&self) -> Option<i64> {
        let i = self.inner.read();
        i.audio.map(|p| p.read(i.paused))
    }

    pub fn video(&self) -> Option<i64> {
        let i = self.inner.read();
        i.video.map(|p| p.read(i.paused))
    }

    /// The clock every other stream synchronizes against.
    ///
    /// Falls back to the wall clock until the master stream has published.
    pub fn reference(&self) -> i64 {
        let i = self.inner.read();
        let master = match self.master {
            MasterClock::Audio => i.audio,
            MasterClock::Video => i.video,
            MasterClock::External => None,
        };
        master.unwrap_or(i.wall).read(i.paused)
    }

    pub fn serial(&self) -> u64 {
        self.inner.read().serial
    }

    /// Pins the audio clock. Returns false, leaving the clock untouched, when
    /// `serial` predates the last seek.
    pub fn publish_audio(&self, serial: u64, ms: i64) -> bool {
        let mut i = self.inner.write();
        if i.serial != serial {
            return false;
        }
        i.audio = Some(Pinned::new(ms));
        true
    }

    pub fn publish_video(&self, serial: u64, ms: i64) -> bool {
        let mut i = self.inner.write();
        if i.serial != serial {
            return false;
        }
        i.video = Some(Pinned::new(ms));
        true
    }

    /// Re-bases every clock onto `ms`, forgetting published stream positions,
    /// and starts a new serial which is returned.
    pub fn seek(&self, ms: i64) -> u64 {
        let mut i = self.inner.write();
        i.wall = Pinned::new(ms);
        i.audio = None;
        i.video = None;
        i.serial += 1;
        i.serial
    }

    pub fn pause(&self) {
        let mut i = self.inner.write();
        if !i.paused {
            i.wall.freeze();
            if let Some(audio) = i.audio.as_mut() {
                audio.freeze();
            }
            if let Some(video) = i.video.as_mut() {
                video.freeze();
            }
            i.paused = true;
        }
    }

    pub fn is_paused(&self) -> bool {
        let i = self.inner.read();
        i.paused
    }

    pub fn resume(&self) {
        let mut i = self.inner.write();
        if i.paused {
            let now = Instant::now();
            i.wall.at = now;
            if let Some(audio) = i.audio.as_mut() {
                audio.at = now;
            }
            if let Some(video) = i.video.as_mut() {
                video.at = now;
            }
            i.paused = false;
        }
    }
}

fn elapsed_ms(since: Instant) -> i64 {
    since.elapsed().as_millis() as i64
}

impl Default for GlobalClock {
    fn default() -> Self {
        Self::new(MasterClock::default())
    }
}
