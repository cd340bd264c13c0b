//! Assembler module - rebuilds logical payloads from frames.
//!
//! Provides:
//! - [`PayloadAssembler`] - reassembly state for one id
//! - [`StreamManager`] - content streams, created lazily and closed by readers
//! - [`PayloadAssemblerManager`] - frame routing and control payload decoding
//! - [`ContentStream`] - reader handle for an incoming attachment

mod content_stream;
mod manager;
mod payload_assembler;
mod stream_manager;

pub use content_stream::ContentStream;
pub use manager::PayloadAssemblerManager;
pub use payload_assembler::PayloadAssembler;
pub use stream_manager::{CancelStreamHandler, StreamManager};
