//! Connection state machine and registry.
//!
//! Each connection tracks its intent flags (`want_read`, `want_write`,
//! `want_close`), which drive the next readiness registration and the
//! teardown decision, plus the two byte buffers the framing codec works
//! against. The registry owns every live connection; removing one from the
//! registry drops the stream and releases the descriptor exactly once.

use crate::runtime::buffer::ByteBuffer;
use crate::runtime::framing::{Decode, FrameCodec};
use mio::net::TcpStream;
use slab::Slab;
use std::net::SocketAddr;
use std::time::Instant;

/// Nominal state of a connection, derived from its intent flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for request bytes. Initial state after accept.
    ReadWait,
    /// Response bytes queued in `outgoing`; waiting for the socket to
    /// accept them.
    WriteWait,
    /// Terminal. Torn down by the event loop before the next poll.
    Closing,
}

/// Why a connection is being closed. Clean closes log at debug, everything
/// else at warn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer shut down with no partial frame pending.
    PeerClosed,
    /// EOF arrived mid-frame: the peer truncated a message.
    TruncatedMessage,
    /// Declared frame length exceeded the configured maximum.
    Oversized { declared: usize },
    /// Outbound queue grew past the pending-bytes limit (slow reader).
    PendingOverflow { queued: usize },
    /// No activity within the idle timeout.
    IdleExpired,
    /// Read or write failed with a real error (not `WouldBlock`).
    Io,
}

impl CloseReason {
    pub fn is_clean(&self) -> bool {
        matches!(self, CloseReason::PeerClosed)
    }
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    /// Peer address, for diagnostics only.
    pub peer: SocketAddr,
    pub want_read: bool,
    pub want_write: bool,
    pub want_close: bool,
    close_reason: Option<CloseReason>,
    /// Bytes read off the socket, front-consumed as frames are extracted.
    pub incoming: ByteBuffer,
    /// Encoded responses, front-consumed as the socket accepts them.
    pub outgoing: ByteBuffer,
    /// Last successful read or write, for the idle sweep.
    pub last_activity: Instant,
}

impl Connection {
    /// Create a connection in `ReadWait`.
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            want_read: true,
            want_write: false,
            want_close: false,
            close_reason: None,
            incoming: ByteBuffer::new(),
            outgoing: ByteBuffer::new(),
            last_activity: Instant::now(),
        }
    }

    pub fn state(&self) -> ConnState {
        if self.want_close {
            ConnState::Closing
        } else if self.want_write {
            ConnState::WriteWait
        } else {
            ConnState::ReadWait
        }
    }

    /// Transition to `WriteWait`.
    pub fn start_writing(&mut self) {
        self.want_read = false;
        self.want_write = true;
    }

    /// Transition back to `ReadWait`. Only valid once `outgoing` is drained.
    pub fn start_reading(&mut self) {
        debug_assert!(self.outgoing.is_empty());
        self.want_read = true;
        self.want_write = false;
    }

    /// Mark the connection for teardown. The first recorded reason wins.
    pub fn request_close(&mut self, reason: CloseReason) {
        if !self.want_close {
            self.want_close = true;
            self.close_reason = Some(reason);
        }
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    /// Extract every complete frame from `incoming` and queue its echo on
    /// `outgoing`, in arrival order.
    ///
    /// Sets `want_close` on an oversized declaration. Returns the number of
    /// frames dispatched.
    pub fn drain_incoming(&mut self, codec: &FrameCodec) -> usize {
        let dispatched = drain_frames(&mut self.incoming, &mut self.outgoing, codec);
        match dispatched {
            Ok(n) => n,
            Err(declared) => {
                self.request_close(CloseReason::Oversized { declared });
                0
            }
        }
    }
}

/// Decode complete frames from `incoming` and echo each payload into
/// `outgoing`. Frame bytes are consumed as they are dispatched, never left
/// behind. Returns the declared length on an oversized frame.
pub fn drain_frames(
    incoming: &mut ByteBuffer,
    outgoing: &mut ByteBuffer,
    codec: &FrameCodec,
) -> Result<usize, usize> {
    let mut dispatched = 0;
    loop {
        match codec.try_decode(incoming.as_slice()) {
            Decode::Incomplete => return Ok(dispatched),
            Decode::Oversized { declared } => return Err(declared),
            Decode::Frame { payload, consumed } => {
                // Echo: the application layer is a pass-through.
                codec.encode(&payload, outgoing);
                incoming.consume(consumed);
                dispatched += 1;
            }
        }
    }
}

/// Registry of live connections, slab-keyed for O(1) lookup from a
/// readiness token back to its connection.
///
/// Slab keys are recycled integer handles; they are never the raw
/// descriptor value, so nothing here depends on OS descriptor numbering.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a connection. Returns `None` at capacity.
    pub fn insert(&mut self, conn: Connection) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Remove a connection. Dropping the returned value closes its socket.
    pub fn remove(&mut self, id: usize) -> Option<Connection> {
        self.connections.try_remove(id)
    }

    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Connection)> {
        self.connections.iter()
    }
}
