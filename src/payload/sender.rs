//! Dedicated writer task for outgoing frames.
//!
//! Callers never touch the transport. Each frame goes through an mpsc
//! channel to a single writer task, which serializes concurrent senders and
//! batches whatever is queued into one transport write.
//!
//! # Architecture
//!
//! ```text
//! send_request  ─┐
//! send_response ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Transport
//! send_cancel   ─┘
//! ```
//!
//! `send_payload` resolves once its frame has been handed to the transport,
//! or fails with the reason the connection went down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Notify};

use super::{DisconnectedHandler, DisconnectedHandlers, TransportDisconnected};
use crate::error::{Result, StreamingError};
use crate::protocol::{Header, HEADER_LENGTH};
use crate::transport::TransportSender;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// A frame ready to be written.
struct OutboundFrame {
    /// Pre-encoded header (48 bytes).
    header: [u8; HEADER_LENGTH],
    /// Payload bytes (empty for zero-length frames).
    payload: Bytes,
    /// Completion signal, fired once the frame was written.
    sent: oneshot::Sender<Result<()>>,
}

impl OutboundFrame {
    fn size(&self) -> usize {
        HEADER_LENGTH + self.payload.len()
    }
}

struct Session {
    generation: u64,
    tx: mpsc::Sender<OutboundFrame>,
    shutdown: Arc<Notify>,
}

struct Inner {
    config: SenderConfig,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
    disconnected: DisconnectedHandlers,
}

impl Inner {
    /// Tear down the session if it is still `generation`.
    fn disconnect_generation(&self, generation: u64, reason: Option<String>) {
        let session = {
            let mut guard = self.session.lock();
            match guard.as_ref() {
                Some(s) if s.generation == generation => guard.take(),
                _ => None,
            }
        };

        if let Some(session) = session {
            session.shutdown.notify_one();
            if let Some(reason) = &reason {
                tracing::debug!("Payload sender disconnected: {}", reason);
            }
            self.disconnected
                .emit(&TransportDisconnected { reason, generation });
        }
    }
}

/// Serializes frames onto a [`TransportSender`].
///
/// Cheaply cloneable; all clones share the same connection.
#[derive(Clone)]
pub struct PayloadSender {
    inner: Arc<Inner>,
}

impl PayloadSender {
    /// Create a disconnected sender.
    pub fn new(config: SenderConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                disconnected: DisconnectedHandlers::default(),
            }),
        }
    }

    /// Attach a transport and spawn the writer task.
    ///
    /// Returns the new connection generation.
    pub fn connect<T: TransportSender>(&self, transport: T) -> Result<u64> {
        let mut guard = self.inner.session.lock();
        if guard.is_some() {
            return Err(StreamingError::AlreadyConnected);
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (tx, rx) = mpsc::channel(self.inner.config.channel_capacity.max(1));
        let shutdown = Arc::new(Notify::new());

        tokio::spawn(writer_loop(
            rx,
            Box::new(transport),
            Arc::downgrade(&self.inner),
            generation,
            shutdown.clone(),
        ));

        *guard = Some(Session {
            generation,
            tx,
            shutdown,
        });
        Ok(generation)
    }

    /// Check if a transport is attached.
    pub fn is_connected(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    /// Generation of the most recent connection.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Detach the transport and raise [`TransportDisconnected`].
    ///
    /// No-op when already disconnected.
    pub fn disconnect(&self, reason: Option<String>) {
        let generation = match self.inner.session.lock().as_ref() {
            Some(session) => session.generation,
            None => return,
        };
        self.inner.disconnect_generation(generation, reason);
    }

    /// Register a disconnect callback.
    pub fn on_disconnected<F>(&self, handler: F)
    where
        F: Fn(&TransportDisconnected) + Send + Sync + 'static,
    {
        let handler: DisconnectedHandler = Arc::new(handler);
        self.inner.disconnected.add(handler);
    }

    /// Write one frame: the encoded header followed by `payload`.
    ///
    /// `payload` must be exactly `header.payload_length` bytes. Resolves once
    /// the frame was handed to the transport. A transport failure disconnects
    /// the sender; the frame is not retried.
    pub async fn send_payload(&self, header: Header, payload: Option<Bytes>) -> Result<()> {
        let payload = payload.unwrap_or_default();
        if payload.len() != header.payload_length {
            return Err(StreamingError::Protocol(format!(
                "payload is {} bytes but header declares {}",
                payload.len(),
                header.payload_length
            )));
        }

        let tx = self
            .inner
            .session
            .lock()
            .as_ref()
            .map(|s| s.tx.clone())
            .ok_or(StreamingError::NotConnected)?;

        let (sent, done) = oneshot::channel();
        let frame = OutboundFrame {
            header: header.encode()?,
            payload,
            sent,
        };

        tx.send(frame)
            .await
            .map_err(|_| StreamingError::NotConnected)?;

        done.await.map_err(|_| {
            StreamingError::Disconnected("sender disconnected before the frame was written".into())
        })?
    }
}

impl Default for PayloadSender {
    fn default() -> Self {
        Self::new(SenderConfig::default())
    }
}

/// Writer loop - receives frames and writes them to the transport.
async fn writer_loop(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut transport: Box<dyn TransportSender>,
    inner: Weak<Inner>,
    generation: u64,
    shutdown: Arc<Notify>,
) {
    loop {
        let first = tokio::select! {
            biased;
            _ = shutdown.notified() => break,
            frame = rx.recv() => match frame {
                Some(f) => f,
                None => break,
            },
        };

        // Collect additional ready frames (non-blocking)
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        match write_batch(transport.as_mut(), &batch).await {
            Ok(()) => {
                for frame in batch {
                    let _ = frame.sent.send(Ok(()));
                }
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::error!("Payload sender write failed: {}", reason);
                for frame in batch {
                    let _ = frame.sent.send(Err(StreamingError::Disconnected(reason.clone())));
                }
                if let Some(inner) = inner.upgrade() {
                    inner.disconnect_generation(generation, Some(reason));
                }
                break;
            }
        }
    }

    let _ = transport.close().await;
}

/// Write a batch of frames as one contiguous buffer.
///
/// The transport may take fewer bytes than offered; keep writing the
/// remainder until the batch is exhausted.
async fn write_batch(transport: &mut dyn TransportSender, batch: &[OutboundFrame]) -> Result<()> {
    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut buf = BytesMut::with_capacity(total_size);
    for frame in batch {
        buf.extend_from_slice(&frame.header);
        buf.extend_from_slice(&frame.payload);
    }

    let mut remaining = &buf[..];
    while !remaining.is_empty() {
        let written = transport.send(remaining).await?;
        if written == 0 {
            return Err(StreamingError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "transport accepted 0 bytes",
            )));
        }
        remaining = &remaining[written..];
    }
    Ok(())
}
