//! Protocol adapter - ties sending, receiving and correlation together.
//!
//! ```text
//! send_request ─► RequestManager (register) ─► SendOperations ─► PayloadSender
//!
//! PayloadReceiver ─► PayloadAssemblerManager ─┬─► request  ─► RequestHandler ─► response
//!                                             ├─► response ─► RequestManager (resolve)
//!                                             └─► cancel   ─► SendOperations (stop stream)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use uuid::Uuid;

use crate::assembler::{PayloadAssemblerManager, StreamManager};
use crate::error::{Result, StreamingError};
use crate::handler::RequestHandler;
use crate::message::{ReceiveRequest, ReceiveResponse, StreamingRequest, StreamingResponse};
use crate::payload::{PayloadReceiver, PayloadSender};
use crate::protocol::PayloadType;
use crate::request_manager::RequestManager;
use crate::send::SendOperations;

/// Removes a pending request unless it was settled.
struct PendingGuard<'a> {
    requests: &'a RequestManager,
    id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.requests.remove(self.id);
    }
}

/// Orchestrates one connection's request/response traffic.
pub struct ProtocolAdapter {
    sender: PayloadSender,
    receiver: PayloadReceiver,
    send_operations: SendOperations,
    request_manager: Arc<RequestManager>,
    stream_manager: Arc<StreamManager>,
    assembler_manager: Arc<PayloadAssemblerManager>,
    request_timeout: Option<Duration>,
}

impl ProtocolAdapter {
    /// Wire `handler` to `sender` and `receiver`.
    ///
    /// The receiver's frames are routed through this adapter from now on.
    pub fn new(
        handler: Arc<dyn RequestHandler>,
        sender: PayloadSender,
        receiver: PayloadReceiver,
        request_timeout: Option<Duration>,
    ) -> Self {
        let send_operations = SendOperations::new(sender.clone());
        let request_manager = Arc::new(RequestManager::new());

        let cancel_ops = send_operations.clone();
        let stream_manager = StreamManager::new(move |assembler| {
            on_cancel_stream(&cancel_ops, assembler.id());
        });

        let request_ops = send_operations.clone();
        let requests = request_manager.clone();
        let remote_cancel_ops = send_operations.clone();
        let assembler_manager = Arc::new(PayloadAssemblerManager::new(
            stream_manager.clone(),
            move |id, request| on_receive_request(&handler, &request_ops, id, request),
            move |id, response| on_receive_response(&requests, id, response),
            move |payload_type, id| on_remote_cancel(&remote_cancel_ops, payload_type, id),
        ));
        receiver.subscribe(assembler_manager.clone());

        Self {
            sender,
            receiver,
            send_operations,
            request_manager,
            stream_manager,
            assembler_manager,
            request_timeout,
        }
    }

    /// Send `request` and wait for its response.
    ///
    /// Fails if the connection drops first, or with `Timeout` once the
    /// configured request timeout expires.
    pub async fn send_request(&self, request: &StreamingRequest) -> Result<ReceiveResponse> {
        let id = Uuid::new_v4();

        // Register first so a fast response cannot miss its entry.
        let pending = self.request_manager.get_response(id)?;
        let _guard = PendingGuard {
            requests: &self.request_manager,
            id,
        };

        self.send_operations.send_request(id, request).await?;

        let outcome = match self.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, pending)
                .await
                .map_err(|_| StreamingError::Timeout)?,
            None => pending.await,
        };

        outcome.map_err(|_| StreamingError::Disconnected("request abandoned".into()))?
    }

    /// Send `response` for the request `id`.
    pub async fn send_response(&self, id: Uuid, response: &StreamingResponse) -> Result<()> {
        self.send_operations.send_response(id, response).await
    }

    /// Ask the remote to stop every stream it is sending.
    pub async fn cancel_all(&self) -> Result<()> {
        self.send_operations.send_cancel_all().await
    }

    /// Settle everything tied to the lost connection.
    ///
    /// Pending requests fail with `Disconnected(reason)`; partially received
    /// payloads are dropped and their readers see `StreamCancelled`.
    pub fn handle_disconnect(&self, reason: &str) {
        let rejected = self.request_manager.reject_all(reason);
        if rejected > 0 {
            tracing::debug!("Rejected {} pending requests: {}", rejected, reason);
        }
        self.stream_manager.clear();
        self.assembler_manager.clear();
    }

    /// The pending request table.
    pub fn request_manager(&self) -> &Arc<RequestManager> {
        &self.request_manager
    }

    /// The incoming content stream table.
    pub fn stream_manager(&self) -> &Arc<StreamManager> {
        &self.stream_manager
    }

    /// The outgoing side.
    pub fn sender(&self) -> &PayloadSender {
        &self.sender
    }

    /// The incoming side.
    pub fn receiver(&self) -> &PayloadReceiver {
        &self.receiver
    }
}

fn on_receive_request(
    handler: &Arc<dyn RequestHandler>,
    send_operations: &SendOperations,
    id: Uuid,
    request: ReceiveRequest,
) {
    let handler = handler.clone();
    let send_operations = send_operations.clone();

    // The handler may read content streams the receive loop is still
    // feeding, so it must not run on the receive loop.
    tokio::spawn(async move {
        let outcome = tokio::spawn(handler.process_request(request)).await;
        let response = match outcome {
            Ok(Ok(Some(response))) => response,
            Ok(Ok(None)) => return,
            Ok(Err(e)) => {
                tracing::error!("Handler error for request {}: {}", id, e);
                StreamingResponse::internal_server_error()
            }
            Err(e) => {
                tracing::error!("Handler panicked for request {}: {}", id, e);
                StreamingResponse::internal_server_error()
            }
        };

        if let Err(e) = send_operations.send_response(id, &response).await {
            tracing::warn!("Failed to send response {}: {}", id, e);
        }
    });
}

fn on_receive_response(requests: &RequestManager, id: Uuid, response: ReceiveResponse) {
    if !requests.signal_response(id, response) {
        tracing::debug!("Dropping response {}: no pending request", id);
    }
}

fn on_remote_cancel(send_operations: &SendOperations, payload_type: PayloadType, id: Uuid) {
    match payload_type {
        PayloadType::CancelStream => {
            if send_operations.cancel_stream(id) {
                tracing::debug!("Remote cancelled stream {}", id);
            }
        }
        PayloadType::CancelAll => {
            let count = send_operations.cancel_all();
            tracing::debug!("Remote cancelled all streams ({} in flight)", count);
        }
        _ => {}
    }
}

fn on_cancel_stream(send_operations: &SendOperations, id: Uuid) {
    let Ok(runtime) = Handle::try_current() else {
        tracing::warn!("Cannot send cancel for stream {}: no runtime", id);
        return;
    };

    let send_operations = send_operations.clone();
    runtime.spawn(async move {
        if let Err(e) = send_operations.send_cancel_stream(id).await {
            tracing::debug!("Failed to send cancel for stream {}: {}", id, e);
        }
    });
}
