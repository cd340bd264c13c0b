//! Request and response messages.
//!
//! Outgoing messages own their content bodies ([`StreamingRequest`],
//! [`StreamingResponse`]). Incoming ones hand out [`ContentStream`] handles
//! whose bytes are still arriving ([`ReceiveRequest`], [`ReceiveResponse`]).
//!
//! # Example
//!
//! ```
//! use streamplex::StreamingRequest;
//!
//! let mut request = StreamingRequest::create("POST", "/api/messages", None);
//! request.set_body(r#"{"hi":"there"}"#);
//! assert_eq!(request.streams.len(), 1);
//! assert_eq!(request.streams[0].content.body.len(), 14);
//! ```

use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

use crate::assembler::ContentStream;
use crate::error::Result;
use crate::protocol::StreamDescription;

/// MIME type used for string and JSON bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// A typed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpContent {
    /// MIME type of `body`.
    pub content_type: Option<String>,
    /// Raw bytes.
    pub body: Bytes,
}

impl HttpContent {
    /// Content with an explicit type.
    pub fn new(content_type: Option<String>, body: impl Into<Bytes>) -> Self {
        Self {
            content_type,
            body: body.into(),
        }
    }

    /// UTF-8 text tagged as JSON, as string bodies are sent.
    pub fn text(body: impl Into<String>) -> Self {
        Self::new(Some(JSON_CONTENT_TYPE.to_string()), body.into())
    }

    /// Serialize `value` to JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::new(
            Some(JSON_CONTENT_TYPE.to_string()),
            serde_json::to_vec(value)?,
        ))
    }

    /// Body length in bytes.
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Check if the body is empty.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// A body sent as its own content stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpContentStream {
    /// Id the stream's frames are tagged with.
    pub id: Uuid,
    /// The body.
    pub content: HttpContent,
}

impl HttpContentStream {
    /// Wrap `content` under a fresh id.
    pub fn new(content: HttpContent) -> Self {
        Self {
            id: Uuid::new_v4(),
            content,
        }
    }

    /// Descriptor announced in the parent payload.
    pub fn description(&self) -> StreamDescription {
        StreamDescription {
            id: self.id,
            content_type: self.content.content_type.clone(),
            length: Some(self.content.len()),
        }
    }
}

/// An outgoing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamingRequest {
    /// HTTP-style verb.
    pub verb: String,
    /// Resource path.
    pub path: String,
    /// Attached bodies.
    pub streams: Vec<HttpContentStream>,
}

impl StreamingRequest {
    /// Build a request with an optional body.
    pub fn create(verb: impl Into<String>, path: impl Into<String>, body: Option<HttpContent>) -> Self {
        let mut request = Self {
            verb: verb.into(),
            path: path.into(),
            streams: Vec::new(),
        };
        if let Some(body) = body {
            request.add_stream(body);
        }
        request
    }

    /// Attach another body.
    pub fn add_stream(&mut self, content: HttpContent) -> Uuid {
        let stream = HttpContentStream::new(content);
        let id = stream.id;
        self.streams.push(stream);
        id
    }

    /// Attach a string body tagged as JSON.
    pub fn set_body(&mut self, body: impl Into<String>) -> Uuid {
        self.add_stream(HttpContent::text(body))
    }
}

/// An outgoing response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamingResponse {
    /// HTTP-style status code.
    pub status_code: u16,
    /// Attached bodies.
    pub streams: Vec<HttpContentStream>,
}

impl StreamingResponse {
    /// Build a response with an optional body.
    pub fn create(status_code: u16, body: Option<HttpContent>) -> Self {
        let mut response = Self {
            status_code,
            streams: Vec::new(),
        };
        if let Some(body) = body {
            response.add_stream(body);
        }
        response
    }

    /// `200` with a JSON body.
    pub fn ok<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::create(200, Some(HttpContent::json(value)?)))
    }

    /// `404` without a body.
    pub fn not_found() -> Self {
        Self::create(404, None)
    }

    /// `500` without a body.
    pub fn internal_server_error() -> Self {
        Self::create(500, None)
    }

    /// Attach another body.
    pub fn add_stream(&mut self, content: HttpContent) -> Uuid {
        let stream = HttpContentStream::new(content);
        let id = stream.id;
        self.streams.push(stream);
        id
    }

    /// Attach `value` serialized as JSON.
    pub fn set_body<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<Uuid> {
        Ok(self.add_stream(HttpContent::json(value)?))
    }
}

/// A request received from the remote side.
#[derive(Debug, Clone, Default)]
pub struct ReceiveRequest {
    /// HTTP-style verb.
    pub verb: String,
    /// Resource path.
    pub path: String,
    /// Attached content, possibly still arriving.
    pub streams: Vec<ContentStream>,
}

/// A response received from the remote side.
#[derive(Debug, Clone, Default)]
pub struct ReceiveResponse {
    /// HTTP-style status code.
    pub status_code: u16,
    /// Attached content, possibly still arriving.
    pub streams: Vec<ContentStream>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_body_uses_json_content_type() {
        let mut request = StreamingRequest::create("POST", "/api/messages", None);
        let id = request.set_body(r#"{"hi":"there"}"#);

        let description = request.streams[0].description();
        assert_eq!(description.id, id);
        assert_eq!(description.content_type.as_deref(), Some(JSON_CONTENT_TYPE));
        assert_eq!(description.length, Some(14));
    }

    #[test]
    fn test_each_stream_gets_a_fresh_id() {
        let mut response = StreamingResponse::create(200, Some(HttpContent::text("a")));
        response.add_stream(HttpContent::new(Some("text/plain".into()), "b"));
        assert_ne!(response.streams[0].id, response.streams[1].id);
    }

    #[test]
    fn test_response_set_body_serializes() {
        #[derive(Serialize)]
        struct Reply {
            answer: u32,
        }

        let mut response = StreamingResponse::create(201, None);
        response.set_body(&Reply { answer: 42 }).unwrap();
        assert_eq!(&response.streams[0].content.body[..], br#"{"answer":42}"#);
        assert_eq!(StreamingResponse::not_found().status_code, 404);
        assert!(StreamingResponse::internal_server_error().streams.is_empty());
    }
}
