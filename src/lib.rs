//! framecast: a framed-echo TCP server on a single readiness-driven loop.
//!
//! One thread multiplexes every client connection over one mio poll. Each
//! connection owns an inbound and an outbound byte buffer; a stateless
//! length-prefixed codec (or a line-delimited one) decides when a complete
//! message has arrived, and each decoded payload is echoed back verbatim.

pub mod config;
pub mod runtime;
