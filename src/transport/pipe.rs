//! Platform-specific named pipe transport.
//!
//! - Unix: a pair of Unix Domain Sockets under the temp directory
//! - Windows: a pair of Named Pipes under `\\.\pipe\`
//!
//! One connection uses two pipes, one per direction. The server reads from
//! `<base>.incoming` and writes to `<base>.outgoing`; the client connects to
//! the same two names in reverse.
//!
//! # Example
//!
//! ```ignore
//! use streamplex::transport::{connect_pipe_pair, PipeServer};
//!
//! let server = PipeServer::bind("bot").await?;
//! let (receiver, sender) = server.accept().await?;
//!
//! // in the other process
//! let (receiver, sender) = connect_pipe_pair("bot").await?;
//! ```

use tokio::io::{AsyncRead, AsyncWrite};

use super::{StreamReceiver, StreamSender};
use crate::error::Result;

/// Suffix of the pipe the server reads from.
pub const SERVER_INCOMING_SUFFIX: &str = ".incoming";

/// Suffix of the pipe the server writes to.
pub const SERVER_OUTGOING_SUFFIX: &str = ".outgoing";

/// Directory or namespace prefix that pipe names live under.
///
/// - Unix: the system temp directory
/// - Windows: `\\.\pipe\`
pub fn pipe_root() -> String {
    #[cfg(unix)]
    {
        let mut root = std::env::temp_dir().to_string_lossy().into_owned();
        if !root.ends_with('/') {
            root.push('/');
        }
        root
    }

    #[cfg(windows)]
    {
        r"\\.\pipe\".to_string()
    }
}

/// Full path of one direction of a named pipe connection.
pub fn pipe_path(base_name: &str, suffix: &str) -> String {
    format!("{}{}{}", pipe_root(), base_name, suffix)
}

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::path::Path;
    use tokio::net::{UnixListener, UnixStream};

    /// Unix Domain Socket listener.
    pub struct PipeListener {
        listener: UnixListener,
        path: String,
    }

    /// Unix Domain Socket stream (connected).
    pub struct PipeStream {
        stream: UnixStream,
    }

    impl PipeListener {
        /// Bind to a Unix socket path.
        ///
        /// Removes any existing socket file at the path before binding.
        pub async fn bind(path: &str) -> Result<Self> {
            if Path::new(path).exists() {
                std::fs::remove_file(path)?;
            }

            let listener = UnixListener::bind(path)?;

            Ok(Self {
                listener,
                path: path.to_string(),
            })
        }

        /// Accept a single connection.
        pub async fn accept(&self) -> Result<PipeStream> {
            let (stream, _addr) = self.listener.accept().await?;
            Ok(PipeStream { stream })
        }

        /// Get the socket path.
        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl Drop for PipeListener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    impl PipeStream {
        /// Connect to a listening socket.
        pub async fn connect(path: &str) -> Result<Self> {
            let stream = UnixStream::connect(path).await?;
            Ok(Self { stream })
        }
    }

    impl AsyncRead for PipeStream {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.stream).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for PipeStream {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::pin::Pin::new(&mut self.stream).poll_write(cx, buf)
        }

        fn poll_flush(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.stream).poll_flush(cx)
        }

        fn poll_shutdown(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.stream).poll_shutdown(cx)
        }
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use parking_lot::Mutex;
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };

    /// Windows Named Pipe listener.
    pub struct PipeListener {
        path: String,
        /// Instance created at bind time, handed out by the first accept.
        first: Mutex<Option<NamedPipeServer>>,
    }

    /// Windows Named Pipe stream (connected).
    pub enum PipeStream {
        /// Server end of a pipe instance.
        Server(NamedPipeServer),
        /// Client end of a pipe instance.
        Client(NamedPipeClient),
    }

    impl PipeListener {
        /// Create a Named Pipe server.
        pub async fn bind(path: &str) -> Result<Self> {
            let server = ServerOptions::new()
                .first_pipe_instance(true)
                .create(path)?;

            Ok(Self {
                path: path.to_string(),
                first: Mutex::new(Some(server)),
            })
        }

        /// Accept a single connection.
        pub async fn accept(&self) -> Result<PipeStream> {
            let first = self.first.lock().take();
            let server = match first {
                Some(server) => server,
                None => ServerOptions::new().create(&self.path)?,
            };

            server.connect().await?;

            Ok(PipeStream::Server(server))
        }

        /// Get the pipe path.
        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl PipeStream {
        /// Connect to a listening pipe.
        pub async fn connect(path: &str) -> Result<Self> {
            let client = ClientOptions::new().open(path)?;
            Ok(PipeStream::Client(client))
        }
    }

    impl AsyncRead for PipeStream {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            match self.get_mut() {
                PipeStream::Server(pipe) => std::pin::Pin::new(pipe).poll_read(cx, buf),
                PipeStream::Client(pipe) => std::pin::Pin::new(pipe).poll_read(cx, buf),
            }
        }
    }

    impl AsyncWrite for PipeStream {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            match self.get_mut() {
                PipeStream::Server(pipe) => std::pin::Pin::new(pipe).poll_write(cx, buf),
                PipeStream::Client(pipe) => std::pin::Pin::new(pipe).poll_write(cx, buf),
            }
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            match self.get_mut() {
                PipeStream::Server(pipe) => std::pin::Pin::new(pipe).poll_flush(cx),
                PipeStream::Client(pipe) => std::pin::Pin::new(pipe).poll_flush(cx),
            }
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            match self.get_mut() {
                PipeStream::Server(pipe) => std::pin::Pin::new(pipe).poll_shutdown(cx),
                PipeStream::Client(pipe) => std::pin::Pin::new(pipe).poll_shutdown(cx),
            }
        }
    }
}

// ============================================================================
// Platform-independent API
// ============================================================================

#[cfg(unix)]
pub use unix_impl::{PipeListener, PipeStream};

#[cfg(windows)]
pub use windows_impl::{PipeListener, PipeStream};

/// Server side of a named pipe connection: both directions bound.
pub struct PipeServer {
    base_name: String,
    incoming: PipeListener,
    outgoing: PipeListener,
}

impl PipeServer {
    /// Bind `<base>.incoming` and `<base>.outgoing`.
    pub async fn bind(base_name: &str) -> Result<Self> {
        let incoming = PipeListener::bind(&pipe_path(base_name, SERVER_INCOMING_SUFFIX)).await?;
        let outgoing = PipeListener::bind(&pipe_path(base_name, SERVER_OUTGOING_SUFFIX)).await?;

        Ok(Self {
            base_name: base_name.to_string(),
            incoming,
            outgoing,
        })
    }

    /// Wait for a client to open both directions.
    pub async fn accept(&self) -> Result<(StreamReceiver<PipeStream>, StreamSender<PipeStream>)> {
        let (incoming, outgoing) = tokio::try_join!(self.incoming.accept(), self.outgoing.accept())?;
        tracing::debug!("Accepted named pipe connection on {}", self.base_name);
        Ok((StreamReceiver::new(incoming), StreamSender::new(outgoing)))
    }

    /// Base name the pipes were bound under.
    pub fn base_name(&self) -> &str {
        &self.base_name
    }
}

/// Bind both pipes and accept one client.
pub async fn accept_pipe_pair(
    base_name: &str,
) -> Result<(StreamReceiver<PipeStream>, StreamSender<PipeStream>)> {
    PipeServer::bind(base_name).await?.accept().await
}

/// Connect to a server bound under `base_name`.
///
/// The client writes to the server's incoming pipe and reads from its
/// outgoing pipe.
pub async fn connect_pipe_pair(
    base_name: &str,
) -> Result<(StreamReceiver<PipeStream>, StreamSender<PipeStream>)> {
    let outgoing = PipeStream::connect(&pipe_path(base_name, SERVER_INCOMING_SUFFIX)).await?;
    let incoming = PipeStream::connect(&pipe_path(base_name, SERVER_OUTGOING_SUFFIX)).await?;
    Ok((StreamReceiver::new(incoming), StreamSender::new(outgoing)))
}
