//! Echo - request/response over named pipes.
//!
//! This demo shows:
//! - Serving requests with a closure handler
//! - Reading a request body and answering with JSON
//! - Sending requests from the other side of the pipe
//!
//! # Running
//!
//! ```text
//! cargo run --example echo -- server
//! cargo run --example echo -- client "hello there"
//! ```

use serde::{Deserialize, Serialize};
use streamplex::{
    handler_fn, ConnectionState, HttpContent, PipeClientConnector, PipeServerConnector,
    ReceiveRequest, StreamingEndpoint, StreamingError, StreamingRequest, StreamingResponse,
};

const PIPE_NAME: &str = "streamplex-echo";

/// Body of an echo reply.
#[derive(Serialize, Deserialize, Debug)]
struct EchoReply {
    path: String,
    echo: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("server") => serve().await?,
        Some("client") => {
            let message = args.next().unwrap_or_else(|| "hello".to_string());
            call(&message).await?;
        }
        _ => eprintln!("usage: echo <server | client [message]>"),
    }
    Ok(())
}

async fn serve() -> streamplex::Result<()> {
    let endpoint = StreamingEndpoint::builder()
        .handler(handler_fn(|request: ReceiveRequest| async move {
            let echo = match request.streams.first() {
                Some(body) => body.read_as_string().await?,
                None => String::new(),
            };
            let reply = EchoReply {
                path: request.path,
                echo,
            };
            Ok::<_, StreamingError>(Some(StreamingResponse::ok(&reply)?))
        }))
        .connect(PipeServerConnector::new(PIPE_NAME))
        .await?;

    println!("client connected");
    endpoint.wait_for_state(ConnectionState::Disconnected).await?;
    println!("client gone");
    Ok(())
}

async fn call(message: &str) -> streamplex::Result<()> {
    let endpoint = StreamingEndpoint::builder()
        .connect(PipeClientConnector::new(PIPE_NAME))
        .await?;

    let request = StreamingRequest::create("POST", "/echo", Some(HttpContent::text(message)));
    let response = endpoint.send(&request).await?;

    let reply: EchoReply = match response.streams.first() {
        Some(body) => body.read_as_json().await?,
        None => return Err(StreamingError::Protocol("empty echo reply".into())),
    };
    println!("{} -> {:?}", response.status_code, reply);
    Ok(())
}
