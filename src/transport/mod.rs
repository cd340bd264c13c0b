//! Transport module - byte-level duplex channels.
//!
//! The protocol layers above only see two halves:
//! - [`TransportSender`] - `send(buffer)`, may accept fewer bytes than offered
//! - [`TransportReceiver`] - `receive(count)`, may return fewer bytes than asked
//!
//! Bindings provided:
//! - Any tokio `AsyncRead`/`AsyncWrite` ([`StreamSender`], [`StreamReceiver`])
//! - Named pipes: Unix Domain Sockets (Linux/macOS), Named Pipes (Windows)
//! - WebSockets (`tokio-tungstenite`)

mod pipe;
mod stream;
pub mod websocket;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::Result;

pub use pipe::{
    accept_pipe_pair, connect_pipe_pair, pipe_path, pipe_root, PipeListener, PipeServer,
    PipeStream, SERVER_INCOMING_SUFFIX, SERVER_OUTGOING_SUFFIX,
};
pub use stream::{split_stream, StreamReceiver, StreamSender};
pub use websocket::{WebSocketReceiver, WebSocketSender};

/// Boxed future returned by transport methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outgoing half of a transport.
pub trait TransportSender: Send + 'static {
    /// Write some prefix of `buffer`, returning how many bytes were taken.
    fn send<'a>(&'a mut self, buffer: &'a [u8]) -> BoxFuture<'a, Result<usize>>;

    /// Check if the transport can still be written to.
    fn is_connected(&self) -> bool;

    /// Close the outgoing half.
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Incoming half of a transport.
pub trait TransportReceiver: Send + 'static {
    /// Read at most `count` bytes. An empty result is never returned: the end
    /// of the stream surfaces as `ConnectionClosed`.
    fn receive(&mut self, count: usize) -> BoxFuture<'_, Result<Bytes>>;

    /// Check if the transport can still be read from.
    fn is_connected(&self) -> bool;

    /// Close the incoming half.
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

impl<T: TransportSender + ?Sized> TransportSender for Box<T> {
    fn send<'a>(&'a mut self, buffer: &'a [u8]) -> BoxFuture<'a, Result<usize>> {
        (**self).send(buffer)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        (**self).close()
    }
}

impl<T: TransportReceiver + ?Sized> TransportReceiver for Box<T> {
    fn receive(&mut self, count: usize) -> BoxFuture<'_, Result<Bytes>> {
        (**self).receive(count)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        (**self).close()
    }
}
