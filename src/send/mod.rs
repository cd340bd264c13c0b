//! Send module - outgoing requests, responses and cancellations.
//!
//! A request or response goes out as its control frame followed by the body
//! frames of every attached stream, each under the stream's own id.
//! Outgoing streams stop early when the remote cancels them.

mod disassembler;

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::message::{HttpContentStream, StreamingRequest, StreamingResponse};
use crate::payload::PayloadSender;

pub use disassembler::{
    disassemble, CancelDisassembler, Disassembler, HttpContentStreamDisassembler,
    RequestDisassembler, ResponseDisassembler,
};

#[derive(Default)]
struct OutgoingStreams {
    in_flight: HashSet<Uuid>,
    cancelled: HashSet<Uuid>,
}

/// Sends logical payloads through a [`PayloadSender`].
///
/// Cheaply cloneable; clones share the outgoing stream table.
#[derive(Clone)]
pub struct SendOperations {
    sender: PayloadSender,
    streams: Arc<Mutex<OutgoingStreams>>,
}

impl SendOperations {
    /// Send through `sender`.
    pub fn new(sender: PayloadSender) -> Self {
        Self {
            sender,
            streams: Arc::new(Mutex::new(OutgoingStreams::default())),
        }
    }

    /// The underlying sender.
    pub fn sender(&self) -> &PayloadSender {
        &self.sender
    }

    /// Send `request` under `id`, then its content streams.
    pub async fn send_request(&self, id: Uuid, request: &StreamingRequest) -> Result<()> {
        disassemble(&RequestDisassembler::new(id, request), &self.sender, || false).await?;
        self.send_streams(&request.streams).await
    }

    /// Send `response` under `id`, then its content streams.
    pub async fn send_response(&self, id: Uuid, response: &StreamingResponse) -> Result<()> {
        disassemble(&ResponseDisassembler::new(id, response), &self.sender, || false).await?;
        self.send_streams(&response.streams).await
    }

    /// Ask the remote to stop sending stream `id`.
    pub async fn send_cancel_stream(&self, id: Uuid) -> Result<()> {
        disassemble(&CancelDisassembler::stream(id), &self.sender, || false).await?;
        Ok(())
    }

    /// Ask the remote to stop sending every stream.
    pub async fn send_cancel_all(&self) -> Result<()> {
        disassemble(&CancelDisassembler::all(Uuid::new_v4()), &self.sender, || false).await?;
        Ok(())
    }

    /// Stop sending stream `id`, if it is being sent.
    pub fn cancel_stream(&self, id: Uuid) -> bool {
        let mut streams = self.streams.lock();
        if streams.in_flight.contains(&id) {
            streams.cancelled.insert(id)
        } else {
            false
        }
    }

    /// Stop sending every stream currently being sent.
    pub fn cancel_all(&self) -> usize {
        let mut streams = self.streams.lock();
        let ids: Vec<Uuid> = streams.in_flight.iter().copied().collect();
        ids.into_iter()
            .filter(|id| streams.cancelled.insert(*id))
            .count()
    }

    /// Number of outgoing streams being sent.
    pub fn in_flight_count(&self) -> usize {
        self.streams.lock().in_flight.len()
    }

    async fn send_streams(&self, streams: &[HttpContentStream]) -> Result<()> {
        for stream in streams {
            self.streams.lock().in_flight.insert(stream.id);

            let id = stream.id;
            let result = disassemble(&HttpContentStreamDisassembler::new(stream), &self.sender, || {
                self.streams.lock().cancelled.contains(&id)
            })
            .await;

            {
                let mut table = self.streams.lock();
                table.in_flight.remove(&id);
                table.cancelled.remove(&id);
            }

            if !result? {
                tracing::debug!("Outgoing stream {} cancelled by remote", id);
            }
        }
        Ok(())
    }
}
