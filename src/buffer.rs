//! Subscribable byte buffer.
//!
//! In-memory FIFO byte queue that receives a payload's bytes as they stream
//! in from the wire. Writers append, readers consume by byte count, and one
//! subscriber can be pushed every freshly written chunk.
//!
//! Only one subscriber is supported at a time: `subscribe` replaces any
//! previous subscriber. The buffer is a single-pass sequence of bytes. It
//! becomes finite once the writer calls `finish`, and it cannot be rewound.
//!
//! # Example
//!
//! ```
//! use streamplex::SubscribableBuffer;
//!
//! let buffer = SubscribableBuffer::new();
//! buffer.write(&b"hello "[..]);
//! buffer.write(&b"world"[..]);
//! assert_eq!(buffer.len(), 11);
//! assert_eq!(&buffer.read(5)[..], b"hello");
//! assert_eq!(buffer.len(), 6);
//! ```

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Callback pushed every chunk written to the buffer.
pub type Subscriber = Box<dyn FnMut(&Bytes) + Send>;

#[derive(Default)]
struct State {
    chunks: VecDeque<Bytes>,
    /// Unread bytes.
    length: usize,
    /// Bytes ever written.
    written: usize,
    finished: bool,
    cancelled: bool,
    subscriber: Option<Subscriber>,
}

impl State {
    fn take(&mut self, count: usize) -> Bytes {
        let count = count.min(self.length);
        if count == 0 {
            return Bytes::new();
        }

        // Single chunk covers the read: hand out a zero-copy slice.
        if let Some(front) = self.chunks.front_mut() {
            if front.len() >= count {
                let out = front.split_to(count);
                if front.is_empty() {
                    self.chunks.pop_front();
                }
                self.length -= count;
                return out;
            }
        }

        let mut out = BytesMut::with_capacity(count);
        while out.len() < count {
            let Some(mut chunk) = self.chunks.pop_front() else {
                break;
            };
            let needed = count - out.len();
            if chunk.len() > needed {
                out.extend_from_slice(&chunk.split_to(needed));
                self.chunks.push_front(chunk);
            } else {
                out.extend_from_slice(&chunk);
            }
        }
        self.length -= out.len();
        out.freeze()
    }
}

/// Append-only byte queue with a single push subscriber.
pub struct SubscribableBuffer {
    state: Mutex<State>,
    notify: Notify,
}

impl SubscribableBuffer {
    /// Create an empty, open buffer.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    /// Create a finished buffer holding `data`.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let buffer = Self::new();
        buffer.write(data);
        buffer.finish();
        buffer
    }

    /// Append a chunk and push it to the subscriber.
    ///
    /// Returns `false` (and drops the chunk) once the buffer is finished or
    /// cancelled.
    pub fn write(&self, chunk: impl Into<Bytes>) -> bool {
        let chunk = chunk.into();
        let mut state = self.state.lock();
        if state.finished || state.cancelled {
            return false;
        }
        if chunk.is_empty() {
            return true;
        }

        state.length += chunk.len();
        state.written += chunk.len();
        state.chunks.push_back(chunk.clone());

        // Run the subscriber outside the lock so it may read from the buffer.
        let mut subscriber = state.subscriber.take();
        drop(state);

        if let Some(callback) = subscriber.as_mut() {
            callback(&chunk);
        }

        let mut state = self.state.lock();
        if state.subscriber.is_none() {
            state.subscriber = subscriber;
        }
        drop(state);

        self.notify.notify_one();
        true
    }

    /// Consume up to `count` bytes without waiting.
    ///
    /// Returns fewer bytes than requested only when less is buffered.
    pub fn read(&self, count: usize) -> Bytes {
        self.state.lock().take(count)
    }

    /// Wait for up to `max` bytes.
    ///
    /// Returns `None` once the buffer is drained and finished, or cancelled.
    pub async fn next_chunk(&self, max: usize) -> Option<Bytes> {
        loop {
            {
                let mut state = self.state.lock();
                if state.cancelled {
                    return None;
                }
                if state.length > 0 {
                    return Some(state.take(max));
                }
                if state.finished {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Register the push subscriber, replacing any previous one.
    ///
    /// Returns `true` if a previous subscriber was replaced.
    pub fn subscribe<F>(&self, callback: F) -> bool
    where
        F: FnMut(&Bytes) + Send + 'static,
    {
        self.state.lock().subscriber.replace(Box::new(callback)).is_some()
    }

    /// Remove the push subscriber.
    pub fn unsubscribe(&self) {
        self.state.lock().subscriber = None;
    }

    /// Mark the end of data. Pending readers wake up.
    pub fn finish(&self) {
        self.state.lock().finished = true;
        self.notify.notify_one();
    }

    /// Abandon the buffer. Later writes are dropped and readers stop.
    pub fn cancel(&self) {
        {
            let mut state = self.state.lock();
            state.cancelled = true;
            state.subscriber = None;
        }
        self.notify.notify_one();
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.state.lock().length
    }

    /// Check if there are no unread bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes ever written.
    pub fn total_written(&self) -> usize {
        self.state.lock().written
    }

    /// Check if the writer signalled completion.
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Check if the buffer was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }
}

impl Default for SubscribableBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SubscribableBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SubscribableBuffer")
            .field("length", &state.length)
            .field("written", &state.written)
            .field("finished", &state.finished)
            .field("cancelled", &state.cancelled)
            .finish()
    }
}
