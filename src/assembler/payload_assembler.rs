//! Reassembly state for one logical stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use uuid::Uuid;

use super::StreamManager;
use crate::buffer::SubscribableBuffer;
use crate::protocol::{Header, PayloadType};

#[derive(Debug, Default)]
struct State {
    content_type: Option<String>,
    content_length: Option<usize>,
    /// Bytes seen of the frame currently arriving.
    frame_received: usize,
    end: bool,
}

/// Collects the frames of one id into a [`SubscribableBuffer`].
///
/// Request and response assemblers complete once their terminal frame has
/// been received in full. Stream assemblers finish their buffer at the same
/// point, which lets readers of the content observe the end of data.
pub struct PayloadAssembler {
    id: Uuid,
    payload_type: PayloadType,
    buffer: Arc<SubscribableBuffer>,
    state: Mutex<State>,
    completed: AtomicBool,
    /// Set once a parent payload handed this stream to a reader.
    claimed: AtomicBool,
    manager: Weak<StreamManager>,
}

impl PayloadAssembler {
    pub(crate) fn new(id: Uuid, payload_type: PayloadType, manager: Weak<StreamManager>) -> Self {
        Self {
            id,
            payload_type,
            buffer: Arc::new(SubscribableBuffer::new()),
            state: Mutex::new(State::default()),
            completed: AtomicBool::new(false),
            claimed: AtomicBool::new(false),
            manager,
        }
    }

    /// Correlation id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Kind of payload being assembled.
    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    /// Landing buffer for this id's bytes.
    pub fn buffer(&self) -> &Arc<SubscribableBuffer> {
        &self.buffer
    }

    /// Declared MIME type, from the parent's stream descriptor.
    pub fn content_type(&self) -> Option<String> {
        self.state.lock().content_type.clone()
    }

    /// Declared length, from the parent's stream descriptor.
    pub fn content_length(&self) -> Option<usize> {
        self.state.lock().content_length
    }

    /// Record the descriptor metadata announced by the parent payload.
    pub fn set_metadata(&self, content_type: Option<String>, content_length: Option<usize>) {
        let mut state = self.state.lock();
        state.content_type = content_type;
        state.content_length = content_length;
    }

    /// Check if the terminal frame has been seen.
    pub fn is_end(&self) -> bool {
        self.state.lock().end
    }

    /// Check if the assembler completed.
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Record that `content_length` more bytes of `header`'s frame arrived.
    ///
    /// Returns `true` exactly once: when the terminal frame is fully in.
    pub fn on_receive(&self, header: &Header, content_length: usize) -> bool {
        let mut state = self.state.lock();

        let frame_done = match self.payload_type {
            PayloadType::Stream => {
                state.frame_received += content_length;
                if state.frame_received >= header.payload_length {
                    state.frame_received = 0;
                    true
                } else {
                    false
                }
            }
            _ => true,
        };

        if !(frame_done && header.end) {
            return false;
        }
        state.end = true;
        drop(state);

        if self.completed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if self.payload_type == PayloadType::Stream {
            // A sender that stops early still terminates the sequence.
            if self.is_short() {
                self.buffer.cancel();
            } else {
                self.buffer.finish();
            }
        }
        true
    }

    /// Release this stream from its manager.
    ///
    /// Closing before the stream completed tells the remote side to stop.
    pub fn close(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.close_stream(self.id);
        } else {
            self.buffer.cancel();
        }
    }

    /// Check if closing now would abandon data the remote still owes us.
    pub(crate) fn is_incomplete(&self) -> bool {
        self.is_short() || !self.is_end()
    }

    /// Fewer bytes arrived than the descriptor declared.
    fn is_short(&self) -> bool {
        self.state
            .lock()
            .content_length
            .is_some_and(|length| self.buffer.total_written() < length)
    }

    pub(crate) fn claim(&self) {
        self.claimed.store(true, Ordering::Release);
    }

    pub(crate) fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for PayloadAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadAssembler")
            .field("id", &self.id)
            .field("payload_type", &self.payload_type)
            .field("completed", &self.is_completed())
            .finish()
    }
}
