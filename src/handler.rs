//! Request handlers.
//!
//! A [`RequestHandler`] receives every fully assembled incoming request and
//! may answer it. Returning `Ok(None)` sends nothing back.
//!
//! # Example
//!
//! ```
//! use streamplex::{handler_fn, ReceiveRequest, StreamingError, StreamingResponse};
//!
//! let handler = handler_fn(|request: ReceiveRequest| async move {
//!     let body = match request.streams.first() {
//!         Some(stream) => stream.read_as_string().await?,
//!         None => String::new(),
//!     };
//!     Ok::<_, StreamingError>(Some(StreamingResponse::ok(&body)?))
//! });
//! # let _ = handler;
//! ```

use std::future::Future;
use std::marker::PhantomData;

use crate::error::Result;
use crate::message::{ReceiveRequest, StreamingResponse};
use crate::transport::BoxFuture;

/// Result type for handler functions.
pub type HandlerResult = Result<Option<StreamingResponse>>;

/// Trait for request handlers.
pub trait RequestHandler: Send + Sync + 'static {
    /// Process one incoming request.
    fn process_request(&self, request: ReceiveRequest) -> BoxFuture<'static, HandlerResult>;
}

/// Wrapper turning an async closure into a [`RequestHandler`].
pub struct FnHandler<F, Fut>
where
    F: Fn(ReceiveRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(ReceiveRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new closure handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> RequestHandler for FnHandler<F, Fut>
where
    F: Fn(ReceiveRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn process_request(&self, request: ReceiveRequest) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(request))
    }
}

/// Build a [`RequestHandler`] from an async closure.
pub fn handler_fn<F, Fut>(handler: F) -> FnHandler<F, Fut>
where
    F: Fn(ReceiveRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnHandler::new(handler)
}

/// Handler that answers every request with `404`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotFoundHandler;

impl RequestHandler for NotFoundHandler {
    fn process_request(&self, _request: ReceiveRequest) -> BoxFuture<'static, HandlerResult> {
        Box::pin(async { Ok(Some(StreamingResponse::not_found())) })
    }
}
