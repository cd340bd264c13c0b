//! Payload module - the wire-level read and write loops.
//!
//! - [`PayloadSender`] - writer task that serializes headers and payload bytes
//! - [`PayloadReceiver`] - receive loop that splits the byte stream into frames
//!
//! Both raise a [`TransportDisconnected`] event when their transport fails or
//! is torn down.

mod receiver;
mod sender;

use std::sync::Arc;

use parking_lot::Mutex;

pub use receiver::{FrameSink, PayloadReceiver};
pub use sender::{PayloadSender, SenderConfig, DEFAULT_CHANNEL_CAPACITY};

/// Raised when a sender or receiver loses its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportDisconnected {
    /// Why the transport went away. `None` for a local, orderly disconnect.
    pub reason: Option<String>,
    /// Connection generation the event belongs to.
    pub generation: u64,
}

impl TransportDisconnected {
    /// Reason text, with a fallback for orderly disconnects.
    pub fn reason_or_default(&self) -> &str {
        self.reason.as_deref().unwrap_or("transport disconnected")
    }
}

/// Callback invoked on [`TransportDisconnected`].
pub type DisconnectedHandler = Arc<dyn Fn(&TransportDisconnected) + Send + Sync>;

#[derive(Default)]
struct DisconnectedHandlers {
    handlers: Mutex<Vec<DisconnectedHandler>>,
}

impl DisconnectedHandlers {
    fn add(&self, handler: DisconnectedHandler) {
        self.handlers.lock().push(handler);
    }

    fn emit(&self, event: &TransportDisconnected) {
        // Snapshot so handlers may register more handlers.
        let handlers = self.handlers.lock().clone();
        for handler in handlers {
            handler(event);
        }
    }
}
