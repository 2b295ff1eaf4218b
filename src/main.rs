//! framecast: a framed-echo TCP server.
//!
//! Features:
//! - Single-threaded readiness-driven event loop (epoll/kqueue via mio)
//! - Length-prefixed or line-delimited framing
//! - Bounded frame size and per-connection outbound queue
//! - Optional idle-connection timeout
//! - Configuration via CLI arguments or TOML file

use framecast::config::Config;
use framecast::runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        framing = ?config.framing,
        max_frame = config.max_frame,
        max_pending = config.max_pending,
        idle_timeout = config.idle_timeout,
        "Starting framecast server"
    );

    runtime::run(config)?;
    Ok(())
}
