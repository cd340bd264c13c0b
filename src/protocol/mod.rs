//! Protocol module - header codec and control payloads.
//!
//! This module implements the wire format:
//! - 48-byte ASCII header encoding/decoding
//! - Payload type enumeration
//! - JSON control payloads for requests and responses

mod control;
mod header;

pub use control::{
    decode_control, encode_control, RequestPayload, ResponsePayload, StreamDescription,
};
pub use header::{
    deserialize_header, serialize_header, Header, PayloadType, HEADER_LENGTH, MAX_LENGTH,
    MAX_PAYLOAD_LENGTH, MIN_LENGTH,
};
