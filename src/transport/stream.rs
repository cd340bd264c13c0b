//! Transport halves over tokio byte streams.
//!
//! Works with anything implementing `AsyncRead`/`AsyncWrite`: in-process
//! `tokio::io::duplex` pairs, TCP, Unix sockets and named pipes.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use super::{BoxFuture, TransportReceiver, TransportSender};
use crate::error::{Result, StreamingError};

/// Outgoing half over an `AsyncWrite`.
pub struct StreamSender<W> {
    writer: W,
    connected: bool,
}

impl<W> StreamSender<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            connected: true,
        }
    }

    /// Unwrap the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    async fn write_some(&mut self, buffer: &[u8]) -> Result<usize> {
        if !self.connected {
            return Err(StreamingError::NotConnected);
        }

        let result = async {
            let n = self.writer.write(buffer).await?;
            self.writer.flush().await?;
            Ok::<_, std::io::Error>(n)
        }
        .await;

        match result {
            Ok(0) if !buffer.is_empty() => {
                self.connected = false;
                Err(StreamingError::ConnectionClosed)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                self.connected = false;
                Err(e.into())
            }
        }
    }
}

impl<W> TransportSender for StreamSender<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn send<'a>(&'a mut self, buffer: &'a [u8]) -> BoxFuture<'a, Result<usize>> {
        Box::pin(self.write_some(buffer))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if std::mem::replace(&mut self.connected, false) {
                self.writer.shutdown().await?;
            }
            Ok(())
        })
    }
}

/// Incoming half over an `AsyncRead`.
pub struct StreamReceiver<R> {
    reader: R,
    connected: bool,
}

impl<R> StreamReceiver<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Wrap a reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            connected: true,
        }
    }

    /// Unwrap the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    async fn read_some(&mut self, count: usize) -> Result<Bytes> {
        if !self.connected {
            return Err(StreamingError::NotConnected);
        }

        let mut buf = vec![0u8; count];
        match self.reader.read(&mut buf).await {
            Ok(0) if count > 0 => {
                self.connected = false;
                Err(StreamingError::ConnectionClosed)
            }
            Ok(n) => {
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            Err(e) => {
                self.connected = false;
                Err(e.into())
            }
        }
    }
}

impl<R> TransportReceiver for StreamReceiver<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    fn receive(&mut self, count: usize) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(self.read_some(count))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        self.connected = false;
        Box::pin(async { Ok(()) })
    }
}

/// Split a full-duplex stream into transport halves.
pub fn split_stream<S>(stream: S) -> (StreamReceiver<ReadHalf<S>>, StreamSender<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    (StreamReceiver::new(read_half), StreamSender::new(write_half))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_send_and_receive_over_duplex() {
        let (a, b) = duplex(64);
        let (_, mut sender) = split_stream(a);
        let (mut receiver, _) = split_stream(b);

        let n = sender.send(b"hello").await.unwrap();
        assert_eq!(n, 5);

        let got = receiver.receive(16).await.unwrap();
        assert_eq!(&got[..], b"hello");
    }

    #[tokio::test]
    async fn test_receive_partial() {
        let (a, b) = duplex(64);
        let (_, mut sender) = split_stream(a);
        let (mut receiver, _) = split_stream(b);

        sender.send(b"abcdef").await.unwrap();
        let first = receiver.receive(4).await.unwrap();
        let second = receiver.receive(4).await.unwrap();
        assert_eq!(&first[..], b"abcd");
        assert_eq!(&second[..], b"ef");
    }

    #[tokio::test]
    async fn test_peer_drop_is_connection_closed() {
        let (a, b) = duplex(64);
        let mut receiver = StreamReceiver::new(b);
        drop(a);

        let result = receiver.receive(48).await;
        assert!(matches!(result, Err(StreamingError::ConnectionClosed)));
        assert!(!receiver.is_connected());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (a, _b) = duplex(64);
        let mut sender = StreamSender::new(a);
        sender.close().await.unwrap();

        assert!(!sender.is_connected());
        assert!(matches!(
            sender.send(b"x").await,
            Err(StreamingError::NotConnected)
        ));
    }
}
