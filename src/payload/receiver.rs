//! Receive loop - splits the incoming byte stream into frames.
//!
//! One task per connection reads a 48-byte header, then the declared number
//! of payload bytes in chunks of at most [`MAX_PAYLOAD_LENGTH`], and hands
//! every chunk to the [`FrameSink`]:
//!
//! - `stream` frames notify the sink after every chunk (progressive delivery)
//! - all other frames notify once, after the full payload arrived
//!
//! Framing is never resynchronized. A malformed header or transport error
//! ends the loop and raises [`TransportDisconnected`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{DisconnectedHandler, DisconnectedHandlers, TransportDisconnected};
use crate::buffer::SubscribableBuffer;
use crate::error::{Result, StreamingError};
use crate::protocol::{Header, PayloadType, HEADER_LENGTH, MAX_PAYLOAD_LENGTH};
use crate::transport::TransportReceiver;

/// Destination for decoded frames.
pub trait FrameSink: Send + Sync + 'static {
    /// Landing buffer for the frame's payload bytes, if anyone wants them.
    ///
    /// Payload bytes of frames without a buffer are read and discarded.
    fn get_stream(&self, header: &Header) -> Option<Arc<SubscribableBuffer>>;

    /// Called after payload bytes of `header` were written to `stream`.
    ///
    /// `content_length` is the chunk size for `stream` frames and the full
    /// payload length for every other type.
    fn on_receive(
        &self,
        header: &Header,
        stream: Option<&Arc<SubscribableBuffer>>,
        content_length: usize,
    );
}

struct Session {
    generation: u64,
    shutdown: Arc<Notify>,
}

struct Inner {
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
    sink: Mutex<Option<Arc<dyn FrameSink>>>,
    disconnected: DisconnectedHandlers,
}

impl Inner {
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
            self.disconnected
                .emit(&TransportDisconnected { reason, generation });
        }
    }
}

/// Drives the receive side of a connection.
///
/// Cheaply cloneable; all clones share the same connection.
#[derive(Clone)]
pub struct PayloadReceiver {
    inner: Arc<Inner>,
}

impl PayloadReceiver {
    /// Create a disconnected receiver.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                sink: Mutex::new(None),
                disconnected: DisconnectedHandlers::default(),
            }),
        }
    }

    /// Route decoded frames to `sink`, replacing any previous sink.
    pub fn subscribe(&self, sink: Arc<dyn FrameSink>) {
        *self.inner.sink.lock() = Some(sink);
    }

    /// Attach a transport and spawn the receive loop.
    ///
    /// Returns the new connection generation.
    pub fn connect<T: TransportReceiver>(&self, transport: T) -> Result<u64> {
        let mut guard = self.inner.session.lock();
        if guard.is_some() {
            return Err(StreamingError::AlreadyConnected);
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let shutdown = Arc::new(Notify::new());

        tokio::spawn(receive_loop(
            Box::new(transport),
            Arc::downgrade(&self.inner),
            generation,
            shutdown.clone(),
        ));

        *guard = Some(Session {
            generation,
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

    /// Stop the receive loop and raise [`TransportDisconnected`].
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
}

impl Default for PayloadReceiver {
    fn default() -> Self {
        Self::new()
    }
}

async fn receive_loop(
    mut transport: Box<dyn TransportReceiver>,
    inner: Weak<Inner>,
    generation: u64,
    shutdown: Arc<Notify>,
) {
    let result = tokio::select! {
        _ = shutdown.notified() => None,
        result = read_frames(transport.as_mut(), &inner) => Some(result),
    };

    let _ = transport.close().await;

    if let Some(Err(e)) = result {
        let reason = e.to_string();
        match &e {
            StreamingError::ConnectionClosed => tracing::debug!("Receive loop ended: {}", reason),
            _ => tracing::error!("Receive loop error: {}", reason),
        }
        if let Some(inner) = inner.upgrade() {
            inner.disconnect_generation(generation, Some(reason));
        }
    }
}

/// Read frames until the transport fails or the receiver is dropped.
async fn read_frames(transport: &mut dyn TransportReceiver, inner: &Weak<Inner>) -> Result<()> {
    loop {
        let header_bytes = receive_exact(transport, HEADER_LENGTH).await?;
        let header = Header::decode(&header_bytes)?;

        let sink = match inner.upgrade() {
            Some(inner) => inner.sink.lock().clone(),
            None => return Ok(()),
        };
        let stream = sink.as_ref().and_then(|s| s.get_stream(&header));

        let mut remaining = header.payload_length;
        while remaining > 0 {
            let chunk = transport
                .receive(remaining.min(MAX_PAYLOAD_LENGTH))
                .await?;
            remaining -= chunk.len();
            let chunk_len = chunk.len();

            if let Some(stream) = &stream {
                stream.write(chunk);
            }
            if header.payload_type == PayloadType::Stream {
                if let Some(sink) = &sink {
                    sink.on_receive(&header, stream.as_ref(), chunk_len);
                }
            }
        }

        // Zero-length stream frames still carry an end flag.
        if header.payload_type != PayloadType::Stream || header.payload_length == 0 {
            if let Some(sink) = &sink {
                sink.on_receive(&header, stream.as_ref(), header.payload_length);
            }
        }
    }
}

/// Accumulate exactly `count` bytes across partial reads.
async fn receive_exact(transport: &mut dyn TransportReceiver, count: usize) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(count);
    while buf.len() < count {
        let chunk = transport.receive(count - buf.len()).await?;
        if chunk.is_empty() {
            return Err(StreamingError::ConnectionClosed);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{split_stream, TransportSender};
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq)]
    struct Seen {
        header: Header,
        content_length: usize,
        had_stream: bool,
    }

    /// Records callbacks; hands out buffers only for ids it was told about.
    struct RecordingSink {
        buffers: Mutex<Vec<(Uuid, Arc<SubscribableBuffer>)>>,
        seen: mpsc::UnboundedSender<Seen>,
    }

    impl RecordingSink {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Seen>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let sink = Arc::new(Self {
                buffers: Mutex::new(Vec::new()),
                seen: tx,
            });
            (sink, rx)
        }

        fn track(&self, id: Uuid) -> Arc<SubscribableBuffer> {
            let buffer = Arc::new(SubscribableBuffer::new());
            self.buffers.lock().push((id, buffer.clone()));
            buffer
        }
    }

    impl FrameSink for RecordingSink {
        fn get_stream(&self, header: &Header) -> Option<Arc<SubscribableBuffer>> {
            self.buffers
                .lock()
                .iter()
                .find(|(id, _)| *id == header.id)
                .map(|(_, b)| b.clone())
        }

        fn on_receive(
            &self,
            header: &Header,
            stream: Option<&Arc<SubscribableBuffer>>,
            content_length: usize,
        ) {
            let _ = self.seen.send(Seen {
                header: *header,
                content_length,
                had_stream: stream.is_some(),
            });
        }
    }

    async fn write_frame<T: TransportSender>(tx: &mut T, header: Header, body: &[u8]) {
        let mut bytes = header.encode().unwrap().to_vec();
        bytes.extend_from_slice(body);
        let mut offset = 0;
        while offset < bytes.len() {
            offset += tx.send(&bytes[offset..]).await.unwrap();
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_request_frame_notified_once() {
        let (local, remote) = duplex(64 * 1024);
        let (rx_half, _) = split_stream(local);
        let (_, mut tx_half) = split_stream(remote);

        let (sink, mut seen) = RecordingSink::new();
        let id = Uuid::new_v4();
        let buffer = sink.track(id);

        let receiver = PayloadReceiver::new();
        receiver.subscribe(sink);
        receiver.connect(rx_half).unwrap();

        let body = br#"{"verb":"GET","path":"/"}"#;
        write_frame(&mut tx_half, Header::new(PayloadType::Request, body.len(), id, true), body)
            .await;

        let event = next(&mut seen).await;
        assert_eq!(event.header.id, id);
        assert_eq!(event.content_length, body.len());
        assert!(event.had_stream);
        assert_eq!(&buffer.read(buffer.len())[..], &body[..]);
    }

    #[tokio::test]
    async fn test_stream_frame_notified_per_chunk() {
        let (local, remote) = duplex(64 * 1024);
        let (rx_half, _) = split_stream(local);
        let (_, mut tx_half) = split_stream(remote);

        let (sink, mut seen) = RecordingSink::new();
        let id = Uuid::new_v4();
        let buffer = sink.track(id);

        let receiver = PayloadReceiver::new();
        receiver.subscribe(sink);
        receiver.connect(rx_half).unwrap();

        let body = vec![7u8; MAX_PAYLOAD_LENGTH + 100];
        write_frame(&mut tx_half, Header::new(PayloadType::Stream, body.len(), id, true), &body)
            .await;

        let mut total = 0;
        while total < body.len() {
            let event = next(&mut seen).await;
            assert!(event.content_length <= MAX_PAYLOAD_LENGTH);
            total += event.content_length;
        }
        assert_eq!(total, body.len());
        assert_eq!(buffer.total_written(), body.len());
    }

    #[tokio::test]
    async fn test_unclaimed_payload_is_skipped() {
        let (local, remote) = duplex(64 * 1024);
        let (rx_half, _) = split_stream(local);
        let (_, mut tx_half) = split_stream(remote);

        let (sink, mut seen) = RecordingSink::new();
        let receiver = PayloadReceiver::new();
        receiver.subscribe(sink);
        receiver.connect(rx_half).unwrap();

        let unknown = Uuid::new_v4();
        write_frame(&mut tx_half, Header::new(PayloadType::Response, 3, unknown, true), b"abc")
            .await;
        let cancel = Uuid::new_v4();
        write_frame(&mut tx_half, Header::new(PayloadType::CancelStream, 0, cancel, true), b"")
            .await;

        let first = next(&mut seen).await;
        assert_eq!(first.header.id, unknown);
        assert!(!first.had_stream);

        // Framing stays aligned after the skipped body.
        let second = next(&mut seen).await;
        assert_eq!(second.header.payload_type, PayloadType::CancelStream);
        assert_eq!(second.header.id, cancel);
        assert_eq!(second.content_length, 0);
    }

    #[tokio::test]
    async fn test_malformed_header_disconnects() {
        let (local, remote) = duplex(1024);
        let (rx_half, _) = split_stream(local);
        let (_, mut tx_half) = split_stream(remote);

        let receiver = PayloadReceiver::new();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        receiver.on_disconnected(move |event| {
            let _ = event_tx.send(event.clone());
        });
        receiver.connect(rx_half).unwrap();

        let garbage = [b'?'; HEADER_LENGTH];
        tx_half.send(&garbage).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.generation, 1);
        assert!(event.reason.unwrap().contains("malformed"));
        assert!(!receiver.is_connected());
    }

    #[tokio::test]
    async fn test_header_split_across_reads() {
        let (local, remote) = duplex(1024);
        let (rx_half, _) = split_stream(local);
        let (_, mut tx_half) = split_stream(remote);

        let (sink, mut seen) = RecordingSink::new();
        let receiver = PayloadReceiver::new();
        receiver.subscribe(sink);
        receiver.connect(rx_half).unwrap();

        let id = Uuid::new_v4();
        let bytes = Header::new(PayloadType::CancelAll, 0, id, true).encode().unwrap();
        tx_half.send(&bytes[..10]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx_half.send(&bytes[10..]).await.unwrap();

        let event = next(&mut seen).await;
        assert_eq!(event.header.payload_type, PayloadType::CancelAll);
        assert_eq!(event.header.id, id);
    }
}
