//! Handle to an incoming content stream.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::PayloadAssembler;
use crate::buffer::SubscribableBuffer;
use crate::error::{Result, StreamingError};
use crate::protocol::decode_control;

/// Releases the stream once the last handle is gone.
struct Release {
    assembler: Arc<PayloadAssembler>,
}

impl Drop for Release {
    fn drop(&mut self) {
        self.assembler.close();
    }
}

/// An attachment of a received request or response.
///
/// The bytes arrive independently of the parent payload; reading waits for
/// them. Reading to the end releases the stream. Dropping the last clone
/// without reading releases it too, and asks the remote to stop sending
/// if the stream was not complete yet.
#[derive(Clone)]
pub struct ContentStream {
    id: Uuid,
    release: Arc<Release>,
}

impl ContentStream {
    pub(crate) fn new(assembler: Arc<PayloadAssembler>) -> Self {
        assembler.claim();
        Self {
            id: assembler.id(),
            release: Arc::new(Release { assembler }),
        }
    }

    fn assembler(&self) -> &PayloadAssembler {
        &self.release.assembler
    }

    /// Stream id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Declared MIME type.
    pub fn content_type(&self) -> Option<String> {
        self.assembler().content_type()
    }

    /// Declared length in bytes.
    pub fn length(&self) -> Option<usize> {
        self.assembler().content_length()
    }

    /// The landing buffer, for incremental consumption.
    pub fn stream(&self) -> &Arc<SubscribableBuffer> {
        self.assembler().buffer()
    }

    /// Stop receiving. The remote is asked to stop sending if the stream
    /// was not complete yet.
    pub fn cancel(&self) {
        self.assembler().close();
    }

    /// Wait for the whole stream and return its bytes.
    ///
    /// Fails with `StreamCancelled` if the stream is cancelled, locally or by
    /// a disconnect, before its end, or if the remote ended it short of its
    /// declared length.
    pub async fn read_all(&self) -> Result<Bytes> {
        let buffer = self.assembler().buffer();
        let mut out = BytesMut::with_capacity(self.length().unwrap_or(0));

        while let Some(chunk) = buffer.next_chunk(usize::MAX).await {
            out.extend_from_slice(&chunk);
        }
        if buffer.is_cancelled() {
            return Err(StreamingError::StreamCancelled(self.id));
        }

        self.assembler().close();
        Ok(out.freeze())
    }

    /// Read the whole stream as UTF-8 text.
    pub async fn read_as_string(&self) -> Result<String> {
        let bytes = self.read_all().await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| StreamingError::Protocol(format!("content stream is not UTF-8: {e}")))
    }

    /// Read the whole stream and parse it as JSON.
    pub async fn read_as_json<T: DeserializeOwned>(&self) -> Result<T> {
        let bytes = self.read_all().await?;
        decode_control(&bytes)
    }
}

impl std::fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStream")
            .field("id", &self.id)
            .field("content_type", &self.content_type())
            .field("length", &self.length())
            .finish()
    }
}
