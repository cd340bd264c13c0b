//! Pending request table.
//!
//! Maps the id of every request still waiting for its response to the
//! channel that completes the caller's future.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{Result, StreamingError};
use crate::message::ReceiveResponse;

/// Receiving end of a pending request.
pub type PendingResponse = oneshot::Receiver<Result<ReceiveResponse>>;

/// Correlates responses with the requests waiting for them.
#[derive(Default)]
pub struct RequestManager {
    pending: Mutex<HashMap<Uuid, oneshot::Sender<Result<ReceiveResponse>>>>,
}

impl RequestManager {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the channel its response arrives on.
    ///
    /// Fails if `id` is already pending.
    pub fn get_response(&self, id: Uuid) -> Result<PendingResponse> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&id) {
            return Err(StreamingError::DuplicateRequest(id));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(id, tx);
        Ok(rx)
    }

    /// Complete the request `id`.
    ///
    /// Returns `false` if nothing was waiting for it.
    pub fn signal_response(&self, id: Uuid, response: ReceiveResponse) -> bool {
        let Some(tx) = self.pending.lock().remove(&id) else {
            return false;
        };
        tx.send(Ok(response)).is_ok()
    }

    /// Forget `id` without completing it.
    pub fn remove(&self, id: Uuid) -> bool {
        self.pending.lock().remove(&id).is_some()
    }

    /// Fail every pending request with `Disconnected(reason)`.
    pub fn reject_all(&self, reason: &str) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(StreamingError::Disconnected(reason.to_string())));
        }
        count
    }

    /// Number of requests waiting for a response.
    pub fn pending_request_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl std::fmt::Debug for RequestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestManager")
            .field("pending", &self.pending_request_count())
            .finish()
    }
}
