//! Header encoding and decoding.
//!
//! Implements the 48-byte ASCII header:
//! ```text
//! ┌──────┬───┬────────┬───┬──────────────────────────────────────┬───┬─────┬────┐
//! │ Type │ . │ Length │ . │ Id                                   │ . │ End │ \n │
//! │ 1    │ 1 │ 6      │ 1 │ 36 (canonical GUID text)             │ 1 │ 1   │ 1  │
//! └──────┴───┴────────┴───┴──────────────────────────────────────┴───┴─────┴────┘
//! ```
//!
//! The length is zero-padded decimal. The end flag is `1` on the final frame
//! of a logical stream and `0` otherwise.

use uuid::{Uuid, Variant};

use crate::error::{Result, StreamingError};

/// Header size in bytes (fixed, exactly 48).
pub const HEADER_LENGTH: usize = 48;

/// Maximum payload bytes carried by a single frame.
pub const MAX_PAYLOAD_LENGTH: usize = 4096;

/// Largest payload length a header can declare.
pub const MAX_LENGTH: usize = 999_999;

/// Smallest payload length a header can declare.
pub const MIN_LENGTH: usize = 0;

const DELIMITER: u8 = b'.';
const TERMINATOR: u8 = b'\n';
const END: u8 = b'1';
const NOT_END: u8 = b'0';

const TYPE_OFFSET: usize = 0;
const TYPE_DELIMITER_OFFSET: usize = 1;
const LENGTH_OFFSET: usize = 2;
const LENGTH_LENGTH: usize = 6;
const LENGTH_DELIMITER_OFFSET: usize = 8;
const ID_OFFSET: usize = 9;
const ID_LENGTH: usize = 36;
const ID_DELIMITER_OFFSET: usize = 45;
const END_OFFSET: usize = 46;
const TERMINATOR_OFFSET: usize = 47;

/// Kind of payload a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    /// Request control payload (`A`).
    Request,
    /// Response control payload (`B`).
    Response,
    /// Content stream bytes (`S`).
    Stream,
    /// Cancel every outgoing stream (`X`).
    CancelAll,
    /// Cancel one outgoing stream (`C`).
    CancelStream,
}

impl PayloadType {
    /// Wire character for this type.
    #[inline]
    pub fn as_byte(self) -> u8 {
        match self {
            PayloadType::Request => b'A',
            PayloadType::Response => b'B',
            PayloadType::Stream => b'S',
            PayloadType::CancelAll => b'X',
            PayloadType::CancelStream => b'C',
        }
    }

    /// Parse a wire character.
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'A' => Some(PayloadType::Request),
            b'B' => Some(PayloadType::Response),
            b'S' => Some(PayloadType::Stream),
            b'X' => Some(PayloadType::CancelAll),
            b'C' => Some(PayloadType::CancelStream),
            _ => None,
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Payload kind.
    pub payload_type: PayloadType,
    /// Number of payload bytes following this header.
    pub payload_length: usize,
    /// Correlation id of the logical stream.
    pub id: Uuid,
    /// True on the final frame for this id.
    pub end: bool,
}

impl Header {
    /// Create a new header.
    pub fn new(payload_type: PayloadType, payload_length: usize, id: Uuid, end: bool) -> Self {
        Self {
            payload_type,
            payload_length,
            id,
            end,
        }
    }

    /// Encode header to its 48-byte wire form.
    ///
    /// # Example
    ///
    /// ```
    /// use streamplex::protocol::{Header, PayloadType, HEADER_LENGTH};
    /// use uuid::Uuid;
    ///
    /// let header = Header::new(PayloadType::Request, 168, Uuid::new_v4(), true);
    /// let bytes = header.encode().unwrap();
    /// assert_eq!(bytes.len(), HEADER_LENGTH);
    /// assert_eq!(&bytes[..9], b"A.000168.");
    /// ```
    pub fn encode(&self) -> Result<[u8; HEADER_LENGTH]> {
        let mut buf = [0u8; HEADER_LENGTH];
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Encode header into an existing buffer.
    ///
    /// Fails if the buffer is shorter than `HEADER_LENGTH` or the payload
    /// length does not fit the six-digit field.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < HEADER_LENGTH {
            return Err(StreamingError::Protocol(format!(
                "Header buffer is {} bytes, need {}",
                buf.len(),
                HEADER_LENGTH
            )));
        }
        if self.payload_length > MAX_LENGTH {
            return Err(StreamingError::Protocol(format!(
                "Payload length {} exceeds maximum {}",
                self.payload_length, MAX_LENGTH
            )));
        }

        let length = format!("{:0width$}", self.payload_length, width = LENGTH_LENGTH);
        let id = self.id.hyphenated().to_string();

        buf[TYPE_OFFSET] = self.payload_type.as_byte();
        buf[TYPE_DELIMITER_OFFSET] = DELIMITER;
        buf[LENGTH_OFFSET..LENGTH_DELIMITER_OFFSET].copy_from_slice(length.as_bytes());
        buf[LENGTH_DELIMITER_OFFSET] = DELIMITER;
        buf[ID_OFFSET..ID_DELIMITER_OFFSET].copy_from_slice(id.as_bytes());
        buf[ID_DELIMITER_OFFSET] = DELIMITER;
        buf[END_OFFSET] = if self.end { END } else { NOT_END };
        buf[TERMINATOR_OFFSET] = TERMINATOR;
        Ok(())
    }

    /// Decode and validate a header.
    ///
    /// Any violation is a framing error; the caller must tear the
    /// connection down since the byte stream can no longer be trusted.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(buf)
            .map_err(|_| StreamingError::MalformedHeader("Cannot parse header, header is not valid text."))?;

        let parts: Vec<&str> = text.split(DELIMITER as char).collect();
        let [payload_type, length, id, end] = parts[..] else {
            return Err(StreamingError::MalformedHeader(
                "Cannot parse header, header is malformed.",
            ));
        };

        if length.is_empty() || !length.bytes().all(|b| b.is_ascii_digit()) {
            return Err(StreamingError::MalformedHeader(
                "Header Length is missing or malformed.",
            ));
        }
        let payload_length: usize = length
            .parse()
            .map_err(|_| StreamingError::MalformedHeader("Header Length is missing or malformed."))?;
        if !(MIN_LENGTH..=MAX_LENGTH).contains(&payload_length) {
            return Err(StreamingError::MalformedHeader(
                "Header Length is missing or malformed.",
            ));
        }

        let payload_type = match payload_type.as_bytes() {
            [byte] => PayloadType::from_byte(*byte),
            _ => None,
        }
        .ok_or(StreamingError::MalformedHeader(
            "Header Type is missing or malformed.",
        ))?;

        let id = parse_canonical_id(id).ok_or(StreamingError::MalformedHeader(
            "Header ID is missing or malformed.",
        ))?;

        let end = match end {
            "1\n" => true,
            "0\n" => false,
            _ => {
                return Err(StreamingError::MalformedHeader(
                    "Header End is missing or not a valid value.",
                ))
            }
        };

        Ok(Self {
            payload_type,
            payload_length,
            id,
            end,
        })
    }
}

/// Accept only the hyphenated 36-char form of an RFC 4122 GUID, version 1-5.
fn parse_canonical_id(text: &str) -> Option<Uuid> {
    if text.len() != ID_LENGTH {
        return None;
    }
    let id = Uuid::parse_str(text).ok()?;
    let version_ok = (1..=5).contains(&id.get_version_num());
    if version_ok && id.get_variant() == Variant::RFC4122 {
        Some(id)
    } else {
        None
    }
}

/// Encode a header to bytes (standalone function).
#[inline]
pub fn serialize_header(header: &Header) -> Result<[u8; HEADER_LENGTH]> {
    header.encode()
}

/// Decode a header from bytes (standalone function).
#[inline]
pub fn deserialize_header(buf: &[u8]) -> Result<Header> {
    Header::decode(buf)
}
