//! # streamplex
//!
//! Multiplexed request/response streaming over a duplex byte transport.
//!
//! Both peers are symmetric: each side can send requests and answer the
//! other's. Request and response bodies travel as content streams, chunked
//! into frames and interleaved with other traffic on the same connection.
//!
//! ## Architecture
//!
//! - **Wire** ([`protocol`]): 48-byte ASCII header followed by at most 4096
//!   payload bytes; control payloads are JSON
//! - **Transport** ([`transport`]): named pipes, WebSockets, or any tokio
//!   `AsyncRead`/`AsyncWrite`
//! - **Payload layer** ([`payload`]): serialized frame writer, framing read loop
//! - **Assembly** ([`assembler`]): rebuilds requests, responses and streams
//! - **Correlation** ([`request_manager`], [`adapter`]): matches responses
//!   to waiting callers and dispatches requests to the [`RequestHandler`]
//!
//! ## Example
//!
//! ```ignore
//! use streamplex::{handler_fn, PipeServerConnector, ReceiveRequest, StreamingEndpoint, StreamingResponse};
//!
//! #[tokio::main]
//! async fn main() -> streamplex::Result<()> {
//!     let endpoint = StreamingEndpoint::builder()
//!         .handler(handler_fn(|request: ReceiveRequest| async move {
//!             Ok(Some(StreamingResponse::ok(&request.path)?))
//!         }))
//!         .connect(PipeServerConnector::new("bot"))
//!         .await?;
//!
//!     endpoint.wait_for_state(streamplex::ConnectionState::Disconnected).await
//! }
//! ```

pub mod adapter;
pub mod assembler;
pub mod buffer;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod message;
pub mod payload;
pub mod protocol;
pub mod request_manager;
pub mod send;
pub mod transport;

pub use adapter::ProtocolAdapter;
pub use assembler::ContentStream;
pub use buffer::SubscribableBuffer;
pub use endpoint::{
    ConnectionState, Connector, EndpointBuilder, EstablishedConnector, PipeClientConnector,
    PipeServerConnector, ReconnectPolicy, StreamingEndpoint, WebSocketConnector,
};
pub use error::{Result, StreamingError};
pub use handler::{handler_fn, RequestHandler};
pub use message::{
    HttpContent, HttpContentStream, ReceiveRequest, ReceiveResponse, StreamingRequest,
    StreamingResponse,
};
