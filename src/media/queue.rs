//! Byte-bounded blocking queue between the reader and a decoder.
//!
//! Capacity is measured in payload bytes rather than item count, so a
//! high-bitrate stream is throttled harder than a low-bitrate one.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

/// Anything that can be accounted against a queue's byte capacity.
pub trait Payload {
    fn payload_size(&self) -> usize;
}

impl Payload for Bytes {
    fn payload_size(&self) -> usize {
        self.len()
    }
}

impl Payload for Vec<u8> {
    fn payload_size(&self) -> usize {
        self.len()
    }
}

struct State<T> {
    items: VecDeque<T>,
    size: usize,
    aborted: bool,
    /// The consumer took an item and has not come back for the next one.
    consumer_busy: bool,
}

pub struct BoundedQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T: Payload> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                size: 0,
                aborted: false,
                consumer_busy: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Enqueues `item`, blocking while it would push the queue over capacity.
    ///
    /// An item larger than the whole capacity is only admitted into an empty
    /// queue; otherwise it could never be pushed at all.
    pub fn push(&self, item: T) -> Result<()> {
        let item_size = item.payload_size();
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return Err(Error::Interrupted);
            }
            let fits = state.size + item_size <= self.capacity;
            if fits || state.items.is_empty() {
                break;
            }
            self.not_full.wait(&mut state);
        }
        state.size += item_size;
        state.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeues the oldest item, blocking while the queue is empty.
    pub fn pop(&self) -> Result<T> {
        let mut state = self.state.lock();
        state.consumer_busy = false;
        loop {
            if state.aborted {
                return Err(Error::Interrupted);
            }
            if let Some(item) = state.items.pop_front() {
                state.size -= item.payload_size();
                state.consumer_busy = true;
                self.not_full.notify_all();
                return Ok(item);
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Like [`pop`](Self::pop) but leaves the item in place.
    pub fn peek(&self) -> Result<T>
    where
        T: Clone,
    {
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return Err(Error::Interrupted);
            }
            if let Some(item) = state.items.front() {
                return Ok(item.clone());
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Wakes every waiter and makes all current and future calls fail with
    /// [`Error::Interrupted`]. Queued items are dropped. Idempotent.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        state.items.clear();
        state.size = 0;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Drops every queued item without aborting the queue.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        state.items.clear();
        state.size = 0;
        self.not_full.notify_all();
    }

    /// Cumulative payload bytes currently queued.
    pub fn size(&self) -> usize {
        self.state.lock().size
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Nothing is queued and the consumer finished whatever it popped last.
    pub fn is_drained(&self) -> bool {
        let state = self.state.lock();
        state.items.is_empty() && !state.consumer_busy
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
