//! Error types for the server.
//!
//! Failures fall into two classes:
//! - [`ConnError`]: terminal for one connection only; it is closed and removed
//! - [`ServerError`]: stops the event loop and is returned from `main`

use crate::protocols::http::{self, response};
use crate::protocols::websocket::{FrameError, HandshakeError, OpCode};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors that close a single connection.
#[derive(Debug, Error)]
pub enum ConnError {
    /// Reading from the socket failed.
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    /// Writing to the socket failed.
    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    /// The HTTP request could not be parsed.
    #[error("malformed request: {0}")]
    MalformedRequest(#[from] http::ParseError),

    /// A complete request that is not a WebSocket upgrade.
    #[error("unsupported request: {0}")]
    UnsupportedRequest(&'static str),

    /// The handshake response could not be built.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// The byte stream is not valid WebSocket framing.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),

    /// A well-formed frame of a type this server does not handle.
    #[error("unsupported frame type: {0:?}")]
    UnsupportedFrame(OpCode),

    /// A non-final data frame or a continuation frame.
    #[error("fragmented messages are not supported")]
    Fragmented,

    /// The peer is not draining responses fast enough.
    #[error("outbound queue overflow: {pending} bytes pending (max: {limit})")]
    OutboundOverflow {
        /// Bytes that would be pending.
        pending: usize,
        /// Maximum allowed.
        limit: usize,
    },

    /// Changing the connection's readiness interest failed.
    #[error("reregister failed: {0}")]
    Register(#[source] io::Error),
}

impl ConnError {
    /// Response to send before closing, for errors raised while still speaking HTTP.
    pub fn http_response(&self) -> Option<&'static [u8]> {
        match self {
            ConnError::MalformedRequest(_)
            | ConnError::UnsupportedRequest(_)
            | ConnError::Handshake(_) => Some(response::BAD_REQUEST),
            _ => None,
        }
    }
}

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be set up.
    #[error("could not open listening socket on {addr}: {source}")]
    Listen {
        /// Address we tried to bind.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The configured host/port is not a socket address.
    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),

    /// Polling for readiness failed.
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),

    /// Accepting a connection failed.
    #[error("could not accept: {0}")]
    Accept(#[source] io::Error),

    /// Registering a socket with the poller failed.
    #[error("could not register socket: {0}")]
    Register(#[source] io::Error),

    /// Installing the signal handlers failed.
    #[error("could not install signal handlers: {0}")]
    Signal(#[source] io::Error),

    /// A readiness event arrived for a connection that is not in the table.
    #[error("connection table out of sync: no entry for connection {0}")]
    MissingConnection(usize),
}
