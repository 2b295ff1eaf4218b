//! The readiness-driven runtime.
//!
//! Leaf-first: `buffer` holds bytes, `framing` turns them into messages,
//! `connection` owns one socket's state machine and the registry of all of
//! them, and `event_loop` drives everything off one mio poll.

mod buffer;
mod connection;
mod event_loop;
mod framing;
mod listener;

pub use buffer::ByteBuffer;
pub use connection::{drain_frames, CloseReason, ConnState, Connection, ConnectionRegistry};
pub use event_loop::Server;
pub use framing::{Decode, FrameCodec, DEFAULT_MAX_FRAME, HEADER_LEN};

use crate::config::Config;

/// Bind and serve forever on the calling thread.
pub fn run(config: Config) -> std::io::Result<()> {
    let mut server = Server::bind(&config)?;
    tracing::info!(addr = %server.local_addr(), "listening");
    server.run()
}
