//! ws-echo: A single-threaded WebSocket echo server
//!
//! Connections start as HTTP. A valid WebSocket upgrade request is answered
//! with the handshake response, after which every text or binary frame is
//! echoed back until the client sends a close frame or disconnects.
//!
//! Features:
//! - Non-blocking, readiness-based I/O on one thread (epoll/kqueue via mio)
//! - Per-connection failure isolation
//! - Bounded request, frame and outbound buffers
//! - Configuration via CLI arguments or TOML file

mod config;
mod error;
mod protocols;
mod runtime;

use config::Config;
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
        host = %config.host,
        port = config.port,
        backlog = config.backlog,
        max_connections = config.max_connections,
        max_frame_size = config.limits.max_frame_size,
        "Starting ws-echo server"
    );

    if let Err(e) = runtime::run(config) {
        tracing::error!(error = %e, "Server failed");
        return Err(e.into());
    }

    info!("Goodbye, Sailor!");
    Ok(())
}
