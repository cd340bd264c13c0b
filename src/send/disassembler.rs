//! Disassemblers - turn one logical payload into frames.

use bytes::Bytes;
use uuid::Uuid;

use crate::error::Result;
use crate::message::{HttpContentStream, StreamingRequest, StreamingResponse};
use crate::payload::PayloadSender;
use crate::protocol::{
    encode_control, Header, PayloadType, RequestPayload, ResponsePayload, MAX_PAYLOAD_LENGTH,
};

/// Something that can be sent as a frame sequence tagged with one id.
pub trait Disassembler {
    /// Frame type of the sequence.
    fn payload_type(&self) -> PayloadType;

    /// Id every frame is tagged with.
    fn id(&self) -> Uuid;

    /// Bytes to send.
    fn payload(&self) -> Result<Bytes>;
}

/// Control frame of an outgoing request.
pub struct RequestDisassembler<'a> {
    id: Uuid,
    request: &'a StreamingRequest,
}

impl<'a> RequestDisassembler<'a> {
    /// Disassemble `request` under `id`.
    pub fn new(id: Uuid, request: &'a StreamingRequest) -> Self {
        Self { id, request }
    }
}

impl Disassembler for RequestDisassembler<'_> {
    fn payload_type(&self) -> PayloadType {
        PayloadType::Request
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn payload(&self) -> Result<Bytes> {
        let payload = RequestPayload {
            verb: Some(self.request.verb.clone()),
            path: Some(self.request.path.clone()),
            streams: self.request.streams.iter().map(|s| s.description()).collect(),
        };
        Ok(encode_control(&payload)?.into())
    }
}

/// Control frame of an outgoing response.
pub struct ResponseDisassembler<'a> {
    id: Uuid,
    response: &'a StreamingResponse,
}

impl<'a> ResponseDisassembler<'a> {
    /// Disassemble `response` under `id`, the id of the request it answers.
    pub fn new(id: Uuid, response: &'a StreamingResponse) -> Self {
        Self { id, response }
    }
}

impl Disassembler for ResponseDisassembler<'_> {
    fn payload_type(&self) -> PayloadType {
        PayloadType::Response
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn payload(&self) -> Result<Bytes> {
        let payload = ResponsePayload {
            status_code: self.response.status_code,
            streams: self.response.streams.iter().map(|s| s.description()).collect(),
        };
        Ok(encode_control(&payload)?.into())
    }
}

/// Body of an attached content stream.
pub struct HttpContentStreamDisassembler<'a> {
    stream: &'a HttpContentStream,
}

impl<'a> HttpContentStreamDisassembler<'a> {
    /// Disassemble `stream` under its own id.
    pub fn new(stream: &'a HttpContentStream) -> Self {
        Self { stream }
    }
}

impl Disassembler for HttpContentStreamDisassembler<'_> {
    fn payload_type(&self) -> PayloadType {
        PayloadType::Stream
    }

    fn id(&self) -> Uuid {
        self.stream.id
    }

    fn payload(&self) -> Result<Bytes> {
        Ok(self.stream.content.body.clone())
    }
}

/// Single empty frame asking the remote to stop sending.
pub struct CancelDisassembler {
    id: Uuid,
    payload_type: PayloadType,
}

impl CancelDisassembler {
    /// Cancel the stream `id`.
    pub fn stream(id: Uuid) -> Self {
        Self {
            id,
            payload_type: PayloadType::CancelStream,
        }
    }

    /// Cancel every stream; `id` only tags the frame.
    pub fn all(id: Uuid) -> Self {
        Self {
            id,
            payload_type: PayloadType::CancelAll,
        }
    }
}

impl Disassembler for CancelDisassembler {
    fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn payload(&self) -> Result<Bytes> {
        Ok(Bytes::new())
    }
}

/// Send `disassembler`'s payload in frames of at most [`MAX_PAYLOAD_LENGTH`].
///
/// An empty payload is a single zero-length terminal frame. `stop` is
/// checked before every frame; once it fires, a zero-length terminal frame
/// closes the sequence so the remote can forget the id, and `false` is
/// returned.
pub async fn disassemble<D, F>(disassembler: &D, sender: &PayloadSender, stop: F) -> Result<bool>
where
    D: Disassembler + ?Sized,
    F: Fn() -> bool,
{
    let payload_type = disassembler.payload_type();
    let id = disassembler.id();
    let mut payload = disassembler.payload()?;

    loop {
        if stop() {
            let header = Header::new(payload_type, 0, id, true);
            sender.send_payload(header, None).await?;
            return Ok(false);
        }
        let chunk = payload.split_to(payload.len().min(MAX_PAYLOAD_LENGTH));
        let end = payload.is_empty();
        let header = Header::new(payload_type, chunk.len(), id, end);
        let body = (!chunk.is_empty()).then_some(chunk);
        sender.send_payload(header, body).await?;
        if end {
            return Ok(true);
        }
    }
}
