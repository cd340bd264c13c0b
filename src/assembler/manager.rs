//! Routes incoming frames to assemblers by payload type.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use uuid::Uuid;

use super::{ContentStream, PayloadAssembler, StreamManager};
use crate::buffer::SubscribableBuffer;
use crate::error::Result;
use crate::message::{ReceiveRequest, ReceiveResponse};
use crate::payload::FrameSink;
use crate::protocol::{
    decode_control, Header, PayloadType, RequestPayload, ResponsePayload, StreamDescription,
};

type RequestCallback = Box<dyn Fn(Uuid, ReceiveRequest) + Send + Sync>;
type ResponseCallback = Box<dyn Fn(Uuid, ReceiveResponse) + Send + Sync>;
type CancelCallback = Box<dyn Fn(PayloadType, Uuid) + Send + Sync>;

/// Turns frames into completed requests and responses.
///
/// - `stream` frames go to the [`StreamManager`]
/// - `request`/`response` frames get an assembler per id that decodes the
///   control payload on its terminal frame
/// - `cancelStream`/`cancelAll` frames are reported to the cancel callback
pub struct PayloadAssemblerManager {
    stream_manager: Arc<StreamManager>,
    active: Mutex<HashMap<(PayloadType, Uuid), Arc<PayloadAssembler>>>,
    on_request: RequestCallback,
    on_response: ResponseCallback,
    on_cancel: CancelCallback,
}

impl PayloadAssemblerManager {
    /// Create a manager delivering completed payloads to the callbacks.
    pub fn new<Req, Resp, Cancel>(
        stream_manager: Arc<StreamManager>,
        on_request: Req,
        on_response: Resp,
        on_cancel: Cancel,
    ) -> Self
    where
        Req: Fn(Uuid, ReceiveRequest) + Send + Sync + 'static,
        Resp: Fn(Uuid, ReceiveResponse) + Send + Sync + 'static,
        Cancel: Fn(PayloadType, Uuid) + Send + Sync + 'static,
    {
        Self {
            stream_manager,
            active: Mutex::new(HashMap::new()),
            on_request: Box::new(on_request),
            on_response: Box::new(on_response),
            on_cancel: Box::new(on_cancel),
        }
    }

    /// The stream manager content streams are registered with.
    pub fn stream_manager(&self) -> &Arc<StreamManager> {
        &self.stream_manager
    }

    /// Number of requests and responses still assembling.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Drop every partially received request and response.
    pub fn clear(&self) {
        self.active.lock().clear();
    }

    fn complete(&self, assembler: &PayloadAssembler) {
        let id = assembler.id();
        let body = assembler.buffer().read(usize::MAX);

        let result = match assembler.payload_type() {
            PayloadType::Request => self.decode_request(&body).map(|r| (self.on_request)(id, r)),
            PayloadType::Response => {
                self.decode_response(&body).map(|r| (self.on_response)(id, r))
            }
            _ => Ok(()),
        };

        if let Err(e) = result {
            tracing::warn!(
                "Dropping {:?} {}: invalid control payload: {}",
                assembler.payload_type(),
                id,
                e
            );
        }
    }

    fn decode_request(&self, body: &[u8]) -> Result<ReceiveRequest> {
        let payload: RequestPayload = decode_control(body)?;
        Ok(ReceiveRequest {
            verb: payload.verb.unwrap_or_default(),
            path: payload.path.unwrap_or_default(),
            streams: self.register_streams(payload.streams),
        })
    }

    fn decode_response(&self, body: &[u8]) -> Result<ReceiveResponse> {
        let payload: ResponsePayload = decode_control(body)?;
        Ok(ReceiveResponse {
            status_code: payload.status_code,
            streams: self.register_streams(payload.streams),
        })
    }

    fn register_streams(&self, descriptions: Vec<StreamDescription>) -> Vec<ContentStream> {
        descriptions
            .into_iter()
            .map(|description| {
                let assembler = self.stream_manager.get_payload_assembler(description.id);
                assembler.set_metadata(description.content_type, description.length);
                ContentStream::new(assembler)
            })
            .collect()
    }
}

impl FrameSink for PayloadAssemblerManager {
    fn get_stream(&self, header: &Header) -> Option<Arc<SubscribableBuffer>> {
        match header.payload_type {
            PayloadType::Stream => self.stream_manager.get_payload_stream(header),
            PayloadType::Request | PayloadType::Response => {
                let assembler = self
                    .active
                    .lock()
                    .entry((header.payload_type, header.id))
                    .or_insert_with(|| {
                        Arc::new(PayloadAssembler::new(
                            header.id,
                            header.payload_type,
                            Weak::new(),
                        ))
                    })
                    .clone();
                Some(assembler.buffer().clone())
            }
            PayloadType::CancelAll | PayloadType::CancelStream => None,
        }
    }

    fn on_receive(
        &self,
        header: &Header,
        _stream: Option<&Arc<SubscribableBuffer>>,
        content_length: usize,
    ) {
        match header.payload_type {
            PayloadType::Stream => self.stream_manager.on_receive(header, content_length),
            PayloadType::Request | PayloadType::Response => {
                let key = (header.payload_type, header.id);
                let assembler = {
                    let mut active = self.active.lock();
                    let assembler = active.get(&key).cloned();
                    if header.end {
                        active.remove(&key);
                    }
                    assembler
                };

                if let Some(assembler) = assembler {
                    if assembler.on_receive(header, content_length) {
                        self.complete(&assembler);
                    }
                }
            }
            PayloadType::CancelAll | PayloadType::CancelStream => {
                (self.on_cancel)(header.payload_type, header.id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_control;

    struct Harness {
        manager: PayloadAssemblerManager,
        requests: Arc<Mutex<Vec<(Uuid, ReceiveRequest)>>>,
        responses: Arc<Mutex<Vec<(Uuid, ReceiveResponse)>>>,
        cancels: Arc<Mutex<Vec<(PayloadType, Uuid)>>>,
    }

    fn harness() -> Harness {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let responses = Arc::new(Mutex::new(Vec::new()));
        let cancels = Arc::new(Mutex::new(Vec::new()));
        let (rq, rs, cn) = (requests.clone(), responses.clone(), cancels.clone());

        let manager = PayloadAssemblerManager::new(
            StreamManager::new(|_: &PayloadAssembler| {}),
            move |id, r| rq.lock().push((id, r)),
            move |id, r| rs.lock().push((id, r)),
            move |t, id| cn.lock().push((t, id)),
        );
        Harness {
            manager,
            requests,
            responses,
            cancels,
        }
    }

    /// Deliver `body` split into frames of `frame_size`, as the receiver would.
    fn deliver(
        manager: &PayloadAssemblerManager,
        payload_type: PayloadType,
        id: Uuid,
        body: &[u8],
        frame_size: usize,
    ) {
        let frames: Vec<&[u8]> = body.chunks(frame_size).collect();
        for (i, frame) in frames.iter().enumerate() {
            let header = Header::new(payload_type, frame.len(), id, i + 1 == frames.len());
            let stream = manager.get_stream(&header);
            if let Some(stream) = &stream {
                stream.write(frame.to_vec());
            }
            manager.on_receive(&header, stream.as_ref(), frame.len());
        }
    }

    #[test]
    fn test_request_decoded_with_stream_descriptors() {
        let h = harness();
        let id = Uuid::new_v4();
        let stream_id = Uuid::new_v4();
        let body = encode_control(&RequestPayload {
            verb: Some("POST".into()),
            path: Some("/api/messages".into()),
            streams: vec![StreamDescription {
                id: stream_id,
                content_type: Some("application/json".into()),
                length: Some(14),
            }],
        })
        .unwrap();

        deliver(&h.manager, PayloadType::Request, id, &body, 4096);

        let requests = h.requests.lock();
        assert_eq!(requests.len(), 1);
        let (got_id, request) = &requests[0];
        assert_eq!(*got_id, id);
        assert_eq!(request.verb, "POST");
        assert_eq!(request.path, "/api/messages");
        assert_eq!(request.streams[0].id(), stream_id);
        assert_eq!(request.streams[0].length(), Some(14));
        assert_eq!(h.manager.stream_manager().active_count(), 1);
        assert_eq!(h.manager.active_count(), 0);
    }

    #[test]
    fn test_response_spanning_frames_completes_once() {
        let h = harness();
        let id = Uuid::new_v4();
        let streams: Vec<_> = (0..200)
            .map(|_| StreamDescription {
                id: Uuid::new_v4(),
                content_type: Some("text/plain".into()),
                length: Some(1),
            })
            .collect();
        let body = encode_control(&ResponsePayload {
            status_code: 200,
            streams,
        })
        .unwrap();
        assert!(body.len() > 4096);

        deliver(&h.manager, PayloadType::Response, id, &body, 4096);

        let responses = h.responses.lock();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].1.streams.len(), 200);
    }

    #[test]
    fn test_invalid_control_payload_dropped() {
        let h = harness();
        deliver(&h.manager, PayloadType::Request, Uuid::new_v4(), b"{oops", 4096);
        assert!(h.requests.lock().is_empty());
        assert_eq!(h.manager.active_count(), 0);
    }

    #[test]
    fn test_cancel_frames_reported() {
        let h = harness();
        let id = Uuid::new_v4();
        for payload_type in [PayloadType::CancelStream, PayloadType::CancelAll] {
            let header = Header::new(payload_type, 0, id, true);
            assert!(h.manager.get_stream(&header).is_none());
            h.manager.on_receive(&header, None, 0);
        }
        assert_eq!(
            &h.cancels.lock()[..],
            &[(PayloadType::CancelStream, id), (PayloadType::CancelAll, id)]
        );
    }
}
