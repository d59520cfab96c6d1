//! Single-picture hand-off between the video decoder and the presentation thread.
//!
//! Unlike a queue of depth one, the two sides are asymmetric: the producer
//! waits for the consumer, the consumer only ever polls.

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

struct SlotState<T> {
    frame: Option<T>,
    aborted: bool,
}

pub struct PictureSlot<T> {
    state: Mutex<SlotState<T>>,
    consumed: Condvar,
}

impl<T> PictureSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                frame: None,
                aborted: false,
            }),
            consumed: Condvar::new(),
        }
    }

    /// Stores `frame`, waiting while the previous one has not been consumed.
    pub fn publish(&self, frame: T) -> Result<()> {
        let mut state = self.state.lock();
        while state.frame.is_some() && !state.aborted {
            self.consumed.wait(&mut state);
        }
        if state.aborted {
            return Err(Error::Interrupted);
        }
        state.frame = Some(frame);
        Ok(())
    }

    /// Takes the ready frame, if any. Never waits.
    pub fn consume(&self) -> Option<T> {
        let mut state = self.state.lock();
        let frame = state.frame.take();
        if frame.is_some() {
            self.consumed.notify_one();
        }
        frame
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().frame.is_some()
    }

    /// Drops an unconsumed frame, e.g. one decoded before a seek.
    pub fn discard(&self) -> bool {
        let mut state = self.state.lock();
        let dropped = state.frame.take().is_some();
        if dropped {
            self.consumed.notify_one();
        }
        dropped
    }

    /// Wakes a blocked producer and fails every later publish. Idempotent.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        state.frame = None;
        self.consumed.notify_all();
    }
}

impl<T> Default for PictureSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
