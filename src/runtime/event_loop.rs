//! mio readiness loop.
//!
//! Readiness-based model: poll tells us when sockets are ready, then we
//! perform non-blocking read/write syscalls. Uses epoll on Linux, kqueue on
//! macOS. mio delivers edge-triggered notifications, so the read and write
//! handlers drain their sockets until `WouldBlock`; stopping early would
//! lose data that arrives between two waits.
//!
//! One thread owns the poll, the registry, and every connection. The only
//! blocking point is the poll call itself.

use crate::config::Config;
use crate::runtime::connection::{CloseReason, Connection, ConnectionRegistry};
use crate::runtime::framing::FrameCodec;
use crate::runtime::listener::bind_listener;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

const READ_CHUNK: usize = 64 * 1024;

/// Readiness bits captured from one poll cycle, in reported order.
struct ReadyEvent {
    id: usize,
    readable: bool,
    writable: bool,
    errored: bool,
}

/// The event loop and everything it owns.
pub struct Server {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: ConnectionRegistry,
    codec: FrameCodec,
    max_pending: usize,
    idle_timeout: Option<Duration>,
}

impl Server {
    /// Bind the listener and set up the poll. Failures here are fatal: the
    /// server cannot serve at all.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let addr: SocketAddr = config
            .listen
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let std_listener = bind_listener(addr)?;
        let local_addr = std_listener.local_addr()?;
        let mut listener = TcpListener::from_std(std_listener);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let idle_timeout = if config.idle_timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(config.idle_timeout))
        };

        Ok(Self {
            poll,
            events: Events::with_capacity(1024),
            listener,
            local_addr,
            registry: ConnectionRegistry::new(config.max_connections),
            codec: config.codec(),
            max_pending: config.max_pending,
            idle_timeout,
        })
    }

    /// Actual bound address; useful when the configured port is 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the loop forever. Returns only on a fatal poll error.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.run_once()?;
        }
    }

    /// One wait-dispatch-sweep cycle.
    fn run_once(&mut self) -> io::Result<()> {
        let timeout = self.poll_timeout();
        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            // A signal interrupting the wait is transient; retry.
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(e);
        }

        // Snapshot the cycle's readiness so handlers can mutate the
        // registry while we iterate. Reported order is preserved.
        let mut accept_ready = false;
        let mut ready = Vec::with_capacity(self.events.iter().count());
        for event in self.events.iter() {
            match event.token() {
                LISTENER_TOKEN => accept_ready = true,
                Token(id) => ready.push(ReadyEvent {
                    id,
                    readable: event.is_readable(),
                    writable: event.is_writable(),
                    errored: event.is_error(),
                }),
            }
        }

        if accept_ready {
            self.accept_ready();
        }
        for ev in ready {
            self.dispatch(ev);
        }
        self.sweep_idle();
        Ok(())
    }

    /// Accept until `WouldBlock`; edge-triggered notification reports the
    /// listener only once per burst.
    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    // At capacity the registry refuses and the socket drops
                    // closed right here.
                    let Some(id) = self.registry.insert(Connection::new(stream, peer)) else {
                        warn!(%peer, "connection limit reached, rejecting");
                        continue;
                    };
                    if let Some(conn) = self.registry.get_mut(id) {
                        if let Err(e) = self.poll.registry().register(
                            &mut conn.stream,
                            Token(id),
                            Interest::READABLE,
                        ) {
                            warn!(conn_id = id, error = %e, "failed to register connection");
                            self.registry.remove(id);
                            continue;
                        }
                    }
                    debug!(conn_id = id, %peer, "accepted connection");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Per-connection failure; the listener itself is fine.
                    error!(error = %e, "accept error");
                    break;
                }
            }
        }
    }

    /// Run read/write handling for one ready connection, then the close
    /// check. Teardown happens in this iteration, before the next poll.
    fn dispatch(&mut self, ev: ReadyEvent) {
        let codec = self.codec;
        let max_pending = self.max_pending;

        // The connection may already be gone (closed earlier this cycle).
        let Some(conn) = self.registry.get_mut(ev.id) else {
            return;
        };

        if ev.readable && conn.want_read {
            read_ready(conn, &codec, max_pending);
        }
        if ev.writable && conn.want_write {
            write_ready(conn);
        }
        if ev.errored {
            conn.request_close(CloseReason::Io);
        }

        if conn.want_close {
            self.close(ev.id);
            return;
        }

        // Exactly one of read/write interest drives the next registration.
        let interest = if conn.want_write {
            Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        if let Err(e) = self
            .poll
            .registry()
            .reregister(&mut conn.stream, Token(ev.id), interest)
        {
            warn!(conn_id = ev.id, error = %e, "reregister failed");
            self.close(ev.id);
        }
    }

    /// Remove from the registry and deregister; dropping the stream
    /// releases the descriptor, on every path.
    fn close(&mut self, id: usize) {
        if let Some(mut conn) = self.registry.remove(id) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            match conn.close_reason() {
                Some(reason) if !reason.is_clean() => {
                    warn!(conn_id = id, peer = %conn.peer, ?reason, "connection closed on error");
                }
                _ => {
                    debug!(conn_id = id, peer = %conn.peer, "connection closed");
                }
            }
        }
    }

    /// Poll timeout: infinite unless an idle deadline is pending.
    fn poll_timeout(&self) -> Option<Duration> {
        let timeout = self.idle_timeout?;
        let now = Instant::now();
        let mut nearest = timeout;
        for (_, conn) in self.registry.iter() {
            let remaining = timeout.saturating_sub(now.duration_since(conn.last_activity));
            nearest = nearest.min(remaining);
        }
        Some(nearest)
    }

    /// Close connections idle past the configured timeout.
    fn sweep_idle(&mut self) {
        let Some(timeout) = self.idle_timeout else {
            return;
        };
        let now = Instant::now();
        let expired: Vec<usize> = self
            .registry
            .iter()
            .filter(|(_, conn)| now.duration_since(conn.last_activity) >= timeout)
            .map(|(id, _)| id)
            .collect();
        for id in expired {
            if let Some(conn) = self.registry.get_mut(id) {
                conn.request_close(CloseReason::IdleExpired);
            }
            self.close(id);
        }
    }
}

/// Readable handler: drain the socket, extract frames, queue echoes, and
/// attempt one opportunistic write if anything got queued.
fn read_ready(conn: &mut Connection, codec: &FrameCodec, max_pending: usize) {
    let mut buf = [0u8; READ_CHUNK];
    let mut eof = false;
    loop {
        match conn.stream.read(&mut buf) {
            Ok(0) => {
                eof = true;
                break;
            }
            Ok(n) => {
                conn.incoming.append(&buf[..n]);
                conn.last_activity = Instant::now();
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(peer = %conn.peer, error = %e, "read error");
                conn.request_close(CloseReason::Io);
                return;
            }
        }
    }

    // Frames that arrived ahead of an EOF are still dispatched; only then
    // can the EOF be classified.
    conn.drain_incoming(codec);
    if conn.want_close {
        return;
    }

    if !conn.outgoing.is_empty() {
        conn.start_writing();
        write_ready(conn);
        if conn.want_close {
            return;
        }
    }

    if eof {
        // EOF mid-frame means the peer truncated a message.
        let reason = if conn.incoming.is_empty() {
            CloseReason::PeerClosed
        } else {
            CloseReason::TruncatedMessage
        };
        conn.request_close(reason);
        return;
    }

    if conn.outgoing.len() > max_pending {
        conn.request_close(CloseReason::PendingOverflow {
            queued: conn.outgoing.len(),
        });
    }
}

/// Writable handler: push `outgoing` until drained or `WouldBlock`. A
/// drained queue reverts interest to reading.
fn write_ready(conn: &mut Connection) {
    while !conn.outgoing.is_empty() {
        match conn.stream.write(conn.outgoing.as_slice()) {
            Ok(0) => {
                conn.request_close(CloseReason::Io);
                return;
            }
            Ok(n) => {
                conn.outgoing.consume(n);
                conn.last_activity = Instant::now();
            }
            // Not an error; retry on the next writable signal.
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(peer = %conn.peer, error = %e, "write error");
                conn.request_close(CloseReason::Io);
                return;
            }
        }
    }
    conn.start_reading();
}
