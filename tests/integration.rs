//! Integration tests for streamplex.
//!
//! These tests drive whole endpoints over real transports, and in a few
//! cases play the remote side by hand on the raw wire.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use streamplex::protocol::{
    encode_control, Header, PayloadType, RequestPayload, ResponsePayload, StreamDescription,
    HEADER_LENGTH,
};
use streamplex::transport::split_stream;
use streamplex::{
    handler_fn, ConnectionState, EstablishedConnector, HttpContent, ReceiveRequest,
    StreamingEndpoint, StreamingError, StreamingRequest, StreamingResponse,
};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use uuid::Uuid;

/// Echo handler: answers with the path and the body it received.
fn echo_endpoint_builder() -> streamplex::EndpointBuilder {
    StreamingEndpoint::builder().handler(handler_fn(|request: ReceiveRequest| async move {
        let body = match request.streams.first() {
            Some(stream) => stream.read_as_string().await?,
            None => String::new(),
        };
        let reply = json!({ "verb": request.verb, "path": request.path, "body": body });
        Ok::<_, StreamingError>(Some(StreamingResponse::ok(&reply)?))
    }))
}

/// Client and server endpoints joined by an in-memory duplex pipe.
async fn connected_pair() -> (StreamingEndpoint, StreamingEndpoint) {
    let (a, b) = duplex(64 * 1024);
    let (a_rx, a_tx) = split_stream(a);
    let (b_rx, b_tx) = split_stream(b);

    let server = echo_endpoint_builder()
        .connect(EstablishedConnector::new(b_rx, b_tx))
        .await
        .unwrap();
    let client = StreamingEndpoint::builder()
        .request_timeout(Duration::from_secs(5))
        .connect(EstablishedConnector::new(a_rx, a_tx))
        .await
        .unwrap();

    (client, server)
}

async fn write_frame(
    io: &mut DuplexStream,
    payload_type: PayloadType,
    id: Uuid,
    end: bool,
    payload: &[u8],
) {
    let header = Header::new(payload_type, payload.len(), id, end).encode().unwrap();
    io.write_all(&header).await.unwrap();
    io.write_all(payload).await.unwrap();
}

async fn read_frame(io: &mut DuplexStream) -> (Header, Vec<u8>) {
    let mut header = [0u8; HEADER_LENGTH];
    io.read_exact(&mut header).await.unwrap();
    let header = Header::decode(&header).unwrap();
    let mut payload = vec![0u8; header.payload_length];
    io.read_exact(&mut payload).await.unwrap();
    (header, payload)
}

/// Test a request with a JSON body through two endpoints.
#[tokio::test]
async fn test_post_with_json_body() {
    let (client, _server) = connected_pair().await;

    let mut request = StreamingRequest::create("POST", "/api/messages", None);
    request.set_body(r#"{"hi":"there"}"#);

    let response = client.send(&request).await.unwrap();
    assert_eq!(response.status_code, 200);
    assert_eq!(response.streams.len(), 1);

    let reply: Value = response.streams[0].read_as_json().await.unwrap();
    assert_eq!(reply["verb"], "POST");
    assert_eq!(reply["path"], "/api/messages");
    assert_eq!(reply["body"], r#"{"hi":"there"}"#);
    assert_eq!(client.pending_request_count(), 0);
}

/// Test a request without a body.
#[tokio::test]
async fn test_get_without_body() {
    let (client, _server) = connected_pair().await;

    let response = client
        .send(&StreamingRequest::create("GET", "/api/version", None))
        .await
        .unwrap();
    let reply: Value = response.streams[0].read_as_json().await.unwrap();
    assert_eq!(reply["body"], "");
}

/// Test a body spanning several frames.
#[tokio::test]
async fn test_large_body_reassembled() {
    let (client, _server) = connected_pair().await;

    let body: String = (0..10_000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    let request = StreamingRequest::create("PUT", "/blob", Some(HttpContent::text(body.clone())));

    let response = client.send(&request).await.unwrap();
    let reply: Value = response.streams[0].read_as_json().await.unwrap();
    assert_eq!(reply["body"].as_str().unwrap(), body);
}

/// Test many requests in flight at once, each resolved with its own response.
#[tokio::test]
async fn test_concurrent_requests_correlate() {
    let (client, _server) = connected_pair().await;
    let client = Arc::new(client);

    let mut tasks = Vec::new();
    for i in 0..32 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let request = StreamingRequest::create(
                "POST",
                format!("/item/{i}"),
                Some(HttpContent::text(format!("payload {i}"))),
            );
            let response = client.send(&request).await.unwrap();
            let reply: Value = response.streams[0].read_as_json().await.unwrap();
            (i, reply)
        }));
    }

    for task in tasks {
        let (i, reply) = task.await.unwrap();
        assert_eq!(reply["path"], format!("/item/{i}"));
        assert_eq!(reply["body"], format!("payload {i}"));
    }
    assert_eq!(client.pending_request_count(), 0);
}

/// Test that both sides can issue requests over one connection.
#[tokio::test]
async fn test_requests_in_both_directions() {
    let (a, b) = duplex(64 * 1024);
    let (a_rx, a_tx) = split_stream(a);
    let (b_rx, b_tx) = split_stream(b);

    let left = echo_endpoint_builder()
        .connect(EstablishedConnector::new(a_rx, a_tx))
        .await
        .unwrap();
    let right = echo_endpoint_builder()
        .connect(EstablishedConnector::new(b_rx, b_tx))
        .await
        .unwrap();

    let request_right = StreamingRequest::create("GET", "/right", None);
    let request_left = StreamingRequest::create("GET", "/left", None);
    let (to_right, to_left) = tokio::join!(left.send(&request_right), right.send(&request_left));
    let to_right: Value = to_right.unwrap().streams[0].read_as_json().await.unwrap();
    let to_left: Value = to_left.unwrap().streams[0].read_as_json().await.unwrap();
    assert_eq!(to_right["path"], "/right");
    assert_eq!(to_left["path"], "/left");
}

/// Test the wire form of an outgoing request and a hand-written response.
#[tokio::test]
async fn test_raw_peer_answers_request() {
    let (local, mut remote) = duplex(64 * 1024);
    let (rx, tx) = split_stream(local);
    let endpoint = StreamingEndpoint::builder()
        .connect(EstablishedConnector::new(rx, tx))
        .await
        .unwrap();
    let endpoint = Arc::new(endpoint);

    let caller = endpoint.clone();
    let request = tokio::spawn(async move {
        caller
            .send(&StreamingRequest::create("GET", "/api/version", None))
            .await
    });

    let (header, payload) = read_frame(&mut remote).await;
    assert_eq!(header.payload_type, PayloadType::Request);
    assert!(header.end);
    let control: RequestPayload = serde_json::from_slice(&payload).unwrap();
    assert_eq!(control.verb.as_deref(), Some("GET"));
    assert_eq!(control.path.as_deref(), Some("/api/version"));
    assert!(control.streams.is_empty());

    let body_id = Uuid::new_v4();
    let response = encode_control(&ResponsePayload {
        status_code: 200,
        streams: vec![StreamDescription {
            id: body_id,
            content_type: Some("text/plain".into()),
            length: Some(5),
        }],
    })
    .unwrap();
    write_frame(&mut remote, PayloadType::Response, header.id, true, &response).await;
    write_frame(&mut remote, PayloadType::Stream, body_id, false, b"he").await;
    write_frame(&mut remote, PayloadType::Stream, body_id, true, b"llo").await;

    let response = request.await.unwrap().unwrap();
    assert_eq!(response.status_code, 200);
    assert_eq!(response.streams[0].content_type().as_deref(), Some("text/plain"));
    assert_eq!(response.streams[0].read_as_string().await.unwrap(), "hello");
}

/// Test that abandoning an incomplete incoming stream emits one cancel frame.
#[tokio::test]
async fn test_cancelled_stream_notifies_remote_once() {
    let (local, mut remote) = duplex(64 * 1024);
    let (rx, tx) = split_stream(local);
    let endpoint = StreamingEndpoint::builder()
        .handler(handler_fn(|request: ReceiveRequest| async move {
            request.streams[0].cancel();
            request.streams[0].cancel();
            Ok(None)
        }))
        .connect(EstablishedConnector::new(rx, tx))
        .await
        .unwrap();

    let stream_id = Uuid::new_v4();
    let control = encode_control(&RequestPayload {
        verb: Some("POST".into()),
        path: Some("/upload".into()),
        streams: vec![StreamDescription {
            id: stream_id,
            content_type: None,
            length: Some(100),
        }],
    })
    .unwrap();
    write_frame(&mut remote, PayloadType::Request, Uuid::new_v4(), true, &control).await;
    write_frame(&mut remote, PayloadType::Stream, stream_id, false, &[0u8; 10]).await;

    let (header, payload) = read_frame(&mut remote).await;
    assert_eq!(header.payload_type, PayloadType::CancelStream);
    assert_eq!(header.id, stream_id);
    assert!(payload.is_empty());

    // Late frames for the cancelled stream are discarded quietly.
    write_frame(&mut remote, PayloadType::Stream, stream_id, true, &[0u8; 10]).await;

    let mut next = [0u8; HEADER_LENGTH];
    let extra = tokio::time::timeout(Duration::from_millis(200), remote.read_exact(&mut next)).await;
    assert!(extra.is_err(), "unexpected second frame");

    let streams = endpoint.adapter().stream_manager();
    assert_eq!(streams.active_count(), 0);
    assert_eq!(streams.closed_count(), 0);
}

/// Wait until `endpoint` tracks no incoming content streams.
async fn wait_for_streams_released(endpoint: &StreamingEndpoint) {
    let streams = endpoint.adapter().stream_manager().clone();
    tokio::time::timeout(Duration::from_secs(2), async move {
        while streams.active_count() > 0 || streams.closed_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("content streams still tracked");
}

/// Test that bodies a handler never reads do not pile up.
#[tokio::test]
async fn test_unread_bodies_are_released() {
    let (a, b) = duplex(64 * 1024);
    let (a_rx, a_tx) = split_stream(a);
    let (b_rx, b_tx) = split_stream(b);

    let server = StreamingEndpoint::builder()
        .connect(EstablishedConnector::new(b_rx, b_tx))
        .await
        .unwrap();
    let client = StreamingEndpoint::builder()
        .connect(EstablishedConnector::new(a_rx, a_tx))
        .await
        .unwrap();

    for i in 0..50 {
        let body = HttpContent::new(Some("text/plain".into()), vec![b'x'; 10 * 1024]);
        let request = StreamingRequest::create("POST", format!("/ignored/{i}"), Some(body));
        let response = client.send(&request).await.unwrap();
        assert_eq!(response.status_code, 404);
    }

    wait_for_streams_released(&server).await;
    wait_for_streams_released(&client).await;
}

/// Test that response bodies the caller drops unread are released.
#[tokio::test]
async fn test_dropped_response_bodies_are_released() {
    let (client, _server) = connected_pair().await;

    for _ in 0..20 {
        let response = client
            .send(&StreamingRequest::create("GET", "/unread", None))
            .await
            .unwrap();
        assert_eq!(response.streams.len(), 1);
    }

    wait_for_streams_released(&client).await;
}

/// Test a body cancelled mid-transfer: the sender stops, and both
/// sides forget the stream.
#[tokio::test]
async fn test_cancel_mid_transfer_releases_both_sides() {
    let (a, b) = duplex(64 * 1024);
    let (a_rx, a_tx) = split_stream(a);
    let (b_rx, b_tx) = split_stream(b);

    let server = StreamingEndpoint::builder()
        .handler(handler_fn(|request: ReceiveRequest| async move {
            let body = &request.streams[0];
            // Wait for the first bytes, then give up on the rest.
            while body.stream().total_written() == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            body.cancel();
            Ok::<_, StreamingError>(Some(StreamingResponse::create(202, None)))
        }))
        .connect(EstablishedConnector::new(b_rx, b_tx))
        .await
        .unwrap();
    let client = StreamingEndpoint::builder()
        .connect(EstablishedConnector::new(a_rx, a_tx))
        .await
        .unwrap();

    let body = HttpContent::new(None, vec![0u8; 4 * 1024 * 1024]);
    let response = client
        .send(&StreamingRequest::create("PUT", "/upload", Some(body)))
        .await
        .unwrap();
    assert_eq!(response.status_code, 202);

    wait_for_streams_released(&server).await;
}

/// Test that a malformed header drops the connection and fails waiters.
#[tokio::test]
async fn test_malformed_header_disconnects() {
    let (local, mut remote) = duplex(64 * 1024);
    let (rx, tx) = split_stream(local);
    let endpoint = Arc::new(
        StreamingEndpoint::builder()
            .connect(EstablishedConnector::new(rx, tx))
            .await
            .unwrap(),
    );

    let caller = endpoint.clone();
    let request = tokio::spawn(async move {
        caller
            .send(&StreamingRequest::create("GET", "/never", None))
            .await
    });

    read_frame(&mut remote).await;
    remote.write_all(&[b'?'; HEADER_LENGTH]).await.unwrap();

    assert!(matches!(
        request.await.unwrap(),
        Err(StreamingError::Disconnected(_))
    ));
    tokio::time::timeout(
        Duration::from_secs(1),
        endpoint.wait_for_state(ConnectionState::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(endpoint.pending_request_count(), 0);
}

/// Test that closing one endpoint fails the other's pending requests.
#[tokio::test]
async fn test_peer_close_rejects_pending() {
    let (a, b) = duplex(64 * 1024);
    let (a_rx, a_tx) = split_stream(a);
    let (b_rx, b_tx) = split_stream(b);

    let server = StreamingEndpoint::builder()
        .handler(handler_fn(|_: ReceiveRequest| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }))
        .connect(EstablishedConnector::new(b_rx, b_tx))
        .await
        .unwrap();
    let client = Arc::new(
        StreamingEndpoint::builder()
            .connect(EstablishedConnector::new(a_rx, a_tx))
            .await
            .unwrap(),
    );

    let caller = client.clone();
    let request = tokio::spawn(async move {
        caller
            .send(&StreamingRequest::create("GET", "/slow", None))
            .await
    });
    while client.pending_request_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    server.disconnect();
    drop(server);

    let result = tokio::time::timeout(Duration::from_secs(1), request)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(StreamingError::Disconnected(_))));
}

/// Test a full round trip over named pipes.
#[cfg(unix)]
#[tokio::test]
async fn test_named_pipe_round_trip() {
    use streamplex::transport::{pipe_path, SERVER_OUTGOING_SUFFIX};
    use streamplex::{PipeClientConnector, PipeServerConnector};

    let base = format!("streamplex-it-{}", Uuid::new_v4().simple());

    let server_base = base.clone();
    let server = tokio::spawn(async move {
        echo_endpoint_builder()
            .connect(PipeServerConnector::new(server_base))
            .await
    });

    let outgoing = pipe_path(&base, SERVER_OUTGOING_SUFFIX);
    while !std::path::Path::new(&outgoing).exists() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let client = StreamingEndpoint::builder()
        .connect(PipeClientConnector::new(base.clone()))
        .await
        .unwrap();
    let _server = server.await.unwrap().unwrap();

    let response = client
        .send(&StreamingRequest::create(
            "POST",
            "/pipe",
            Some(HttpContent::text("over the pipe")),
        ))
        .await
        .unwrap();
    let reply: Value = response.streams[0].read_as_json().await.unwrap();
    assert_eq!(reply["body"], "over the pipe");
}
