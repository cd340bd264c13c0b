//! WebSocket transport over `tokio-tungstenite`.
//!
//! Each `send` becomes one binary message. On the receive side messages are
//! flattened back into a byte stream: `receive(count)` hands out slices of
//! the current message and pulls the next one once it is used up.

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{BoxFuture, TransportReceiver, TransportSender};
use crate::error::{Result, StreamingError};

/// Stream type produced by [`connect`].
pub type ClientStream = MaybeTlsStream<TcpStream>;

/// Outgoing half of a WebSocket.
pub struct WebSocketSender<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    connected: bool,
}

/// Incoming half of a WebSocket.
pub struct WebSocketReceiver<S> {
    stream: SplitStream<WebSocketStream<S>>,
    /// Unconsumed remainder of the last message.
    pending: Bytes,
    connected: bool,
}

/// Split an established WebSocket into transport halves.
pub fn split_websocket<S>(socket: WebSocketStream<S>) -> (WebSocketReceiver<S>, WebSocketSender<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = socket.split();
    (
        WebSocketReceiver {
            stream,
            pending: Bytes::new(),
            connected: true,
        },
        WebSocketSender {
            sink,
            connected: true,
        },
    )
}

/// Open a client WebSocket to `url`.
pub async fn connect(
    url: &str,
) -> Result<(WebSocketReceiver<ClientStream>, WebSocketSender<ClientStream>)> {
    let (socket, _response) = tokio_tungstenite::connect_async(url).await?;
    tracing::debug!("WebSocket connected to {}", url);
    Ok(split_websocket(socket))
}

/// Run the server handshake on an accepted connection.
pub async fn accept<S>(stream: S) -> Result<(WebSocketReceiver<S>, WebSocketSender<S>)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let socket = tokio_tungstenite::accept_async(stream).await?;
    Ok(split_websocket(socket))
}

impl<S> TransportSender for WebSocketSender<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn send<'a>(&'a mut self, buffer: &'a [u8]) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            if !self.connected {
                return Err(StreamingError::NotConnected);
            }
            if let Err(e) = self.sink.send(Message::Binary(buffer.to_vec())).await {
                self.connected = false;
                return Err(e.into());
            }
            Ok(buffer.len())
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if std::mem::replace(&mut self.connected, false) {
                self.sink.send(Message::Close(None)).await?;
            }
            Ok(())
        })
    }
}

impl<S> TransportReceiver for WebSocketReceiver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn receive(&mut self, count: usize) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(async move {
            loop {
                if !self.pending.is_empty() {
                    let n = count.min(self.pending.len());
                    return Ok(self.pending.split_to(n));
                }
                if !self.connected {
                    return Err(StreamingError::NotConnected);
                }

                match self.stream.next().await {
                    Some(Ok(Message::Binary(data))) => self.pending = Bytes::from(data),
                    Some(Ok(Message::Text(text))) => self.pending = Bytes::from(text),
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        self.connected = false;
                        return Err(StreamingError::ConnectionClosed);
                    }
                    Some(Err(e)) => {
                        self.connected = false;
                        return Err(e.into());
                    }
                }
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        self.connected = false;
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_messages_flatten_into_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            accept(tcp).await.unwrap()
        });

        let (_client_rx, mut client_tx) = connect(&format!("ws://{addr}")).await.unwrap();
        let (mut server_rx, _server_tx) = server.await.unwrap();

        client_tx.send(b"hello").await.unwrap();
        client_tx.send(b"world").await.unwrap();

        assert_eq!(&server_rx.receive(3).await.unwrap()[..], b"hel");
        assert_eq!(&server_rx.receive(8).await.unwrap()[..], b"lo");
        assert_eq!(&server_rx.receive(8).await.unwrap()[..], b"world");
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            accept(tcp).await.unwrap()
        });

        let (_client_rx, mut client_tx) = connect(&format!("ws://{addr}")).await.unwrap();
        let (mut server_rx, _server_tx) = server.await.unwrap();

        client_tx.close().await.unwrap();
        assert!(matches!(
            server_rx.receive(8).await,
            Err(StreamingError::ConnectionClosed)
        ));
        assert!(!server_rx.is_connected());
    }
}
