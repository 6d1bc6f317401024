//! Single-threaded runtime for the echo server.
//!
//! - `connection`: per-connection protocol state and the connection table
//! - `protocol`: HTTP upgrade gate and WebSocket echo loop
//! - `buffer`: bounded outbound queue drained on write readiness
//! - `signal`: SIGINT/SIGTERM delivered as readiness events (signal-hook-mio)
//! - `mio`: the accept/read/write event loop

mod buffer;
mod connection;
pub mod mio;
pub mod protocol;
mod signal;

use connection::ConnectionTable;
use signal::TerminationSignals;

use crate::config::Config;
use crate::error::ServerError;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, ToSocketAddrs};
use tracing::info;

/// Run the server until it is shut down or fails.
pub fn run(config: Config) -> Result<(), ServerError> {
    let addr = resolve(&config.listen_address())?;
    let listener = bind_listener(addr, config.backlog)?;

    let mut event_loop = mio::EventLoop::new(
        listener,
        ConnectionTable::new(config.max_connections),
        config.limits,
        config.events_capacity,
    )
    .map_err(ServerError::Register)?;

    let signals = TerminationSignals::install().map_err(ServerError::Signal)?;
    event_loop
        .watch_signals(signals)
        .map_err(ServerError::Signal)?;

    info!(
        addr = %event_loop.local_addr().unwrap_or(addr),
        backlog = config.backlog,
        max_connections = config.max_connections,
        "Listening"
    );

    event_loop.run()
}

fn resolve(address: &str) -> Result<SocketAddr, ServerError> {
    address
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ServerError::InvalidAddress(address.to_string()))
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> Result<std::net::TcpListener, ServerError> {
    let listen_err = |source| ServerError::Listen { addr, source };

    let socket = Socket::new(
        match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        },
        Type::STREAM,
        Some(Protocol::TCP),
    )
    .map_err(listen_err)?;

    socket.set_reuse_address(true).map_err(listen_err)?;
    socket.set_nonblocking(true).map_err(listen_err)?;
    socket.bind(&addr.into()).map_err(listen_err)?;
    socket.listen(backlog).map_err(listen_err)?;

    Ok(socket.into())
}
