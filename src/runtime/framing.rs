//! Frame codecs: turning a byte stream into discrete messages and back.
//!
//! The codec is stateless; all accumulation state lives in the caller's
//! `ByteBuffer`. Two framings share one connection state machine:
//!
//! - `LengthPrefixed`: `u32` little-endian length followed by exactly that
//!   many payload bytes. The primary wire format.
//! - `LineDelimited`: payload runs up to a `\n` (a trailing `\r` is
//!   stripped on decode). Kept for interop with line-oriented clients.

use crate::runtime::buffer::ByteBuffer;

/// Length prefix size for `LengthPrefixed` framing.
pub const HEADER_LEN: usize = 4;

/// Default maximum frame payload: 32 MiB.
pub const DEFAULT_MAX_FRAME: usize = 32 << 20;

/// Result of attempting to decode one frame from buffered bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decode {
    /// Not enough bytes buffered yet; wait for more.
    Incomplete,
    /// Declared length exceeds the configured maximum. The connection
    /// should be closed without buffering the claimed payload.
    Oversized { declared: usize },
    /// One complete frame. `consumed` counts header plus payload (plus
    /// delimiter for line framing) and must be removed from the buffer.
    Frame { payload: Vec<u8>, consumed: usize },
}

/// Framing strategy for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCodec {
    LengthPrefixed { max_frame: usize },
    LineDelimited { max_line: usize },
}

impl FrameCodec {
    pub fn length_prefixed(max_frame: usize) -> Self {
        FrameCodec::LengthPrefixed { max_frame }
    }

    pub fn line_delimited(max_line: usize) -> Self {
        FrameCodec::LineDelimited { max_line }
    }

    /// Maximum payload size this codec accepts.
    pub fn max_frame(&self) -> usize {
        match *self {
            FrameCodec::LengthPrefixed { max_frame } => max_frame,
            FrameCodec::LineDelimited { max_line } => max_line,
        }
    }

    /// Try to decode one frame from the front of `buf`.
    ///
    /// The caller consumes `consumed` bytes from its buffer on success. The
    /// oversized check runs as soon as the header is readable, before the
    /// payload arrives, so a hostile length cannot force unbounded buffering.
    pub fn try_decode(&self, buf: &[u8]) -> Decode {
        match *self {
            FrameCodec::LengthPrefixed { max_frame } => {
                if buf.len() < HEADER_LEN {
                    return Decode::Incomplete;
                }
                let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
                if len > max_frame {
                    return Decode::Oversized { declared: len };
                }
                if buf.len() < HEADER_LEN + len {
                    return Decode::Incomplete;
                }
                Decode::Frame {
                    payload: buf[HEADER_LEN..HEADER_LEN + len].to_vec(),
                    consumed: HEADER_LEN + len,
                }
            }
            FrameCodec::LineDelimited { max_line } => {
                match buf.iter().position(|&b| b == b'\n') {
                    Some(pos) => {
                        let line = if pos > 0 && buf[pos - 1] == b'\r' {
                            &buf[..pos - 1]
                        } else {
                            &buf[..pos]
                        };
                        if line.len() > max_line {
                            return Decode::Oversized {
                                declared: line.len(),
                            };
                        }
                        Decode::Frame {
                            payload: line.to_vec(),
                            consumed: pos + 1,
                        }
                    }
                    // No delimiter yet. An over-long partial line is already
                    // beyond saving, so reject it without waiting.
                    None if buf.len() > max_line => Decode::Oversized {
                        declared: buf.len(),
                    },
                    None => Decode::Incomplete,
                }
            }
        }
    }

    /// Encode one payload and append it to `out`.
    pub fn encode(&self, payload: &[u8], out: &mut ByteBuffer) {
        match *self {
            FrameCodec::LengthPrefixed { .. } => {
                out.append(&(payload.len() as u32).to_le_bytes());
                out.append(payload);
            }
            FrameCodec::LineDelimited { .. } => {
                out.append(payload);
                out.append(b"\n");
            }
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        FrameCodec::LengthPrefixed {
            max_frame: DEFAULT_MAX_FRAME,
        }
    }
}
