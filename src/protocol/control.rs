//! Control payloads carried by request and response frames.
//!
//! The body of a `request`/`response` frame sequence is a small JSON
//! document. Content streams travel separately and are only described here:
//!
//! ```json
//! {"verb":"POST","path":"/api/messages","streams":[{"id":"…","type":"application/json","length":13}]}
//! {"statusCode":200,"streams":[]}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

const BYTE_ORDER_MARK: &[u8] = b"\xEF\xBB\xBF";

/// Descriptor of a content stream attached to a request or response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescription {
    /// Id the stream's frames are tagged with.
    pub id: Uuid,
    /// MIME type of the content.
    #[serde(
        rename = "type",
        alias = "contentType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub content_type: Option<String>,
    /// Declared length in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
}

/// JSON body of a request frame sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPayload {
    /// HTTP-style verb.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verb: Option<String>,
    /// Resource path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Attached content streams.
    #[serde(default)]
    pub streams: Vec<StreamDescription>,
}

/// JSON body of a response frame sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePayload {
    /// HTTP-style status code.
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    /// Attached content streams.
    #[serde(default)]
    pub streams: Vec<StreamDescription>,
}

/// Encode a control payload to JSON bytes.
pub fn encode_control<T: Serialize>(payload: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(payload)?)
}

/// Decode a control payload, ignoring a leading UTF-8 byte-order mark.
pub fn decode_control<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    let data = data.strip_prefix(BYTE_ORDER_MARK).unwrap_or(data);
    Ok(serde_json::from_slice(data)?)
}
