//! Server side of the opening handshake (RFC 6455 §4.2.2).

use crate::protocols::http::Request;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};
use thiserror::Error;

/// GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Handshake construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    /// The request carries no `Sec-WebSocket-Key`.
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
}

/// Compute `Sec-WebSocket-Accept` for a client key: base64(SHA-1(key + GUID)).
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Build the `101 Switching Protocols` response for an upgrade request.
pub fn handshake_response(request: &Request) -> Result<Bytes, HandshakeError> {
    let key = request
        .header("sec-websocket-key")
        .ok_or(HandshakeError::MissingKey)?;
    let accept = accept_key(key);

    let mut out = BytesMut::with_capacity(160);
    out.put_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    out.put_slice(b"Upgrade: websocket\r\n");
    out.put_slice(b"Connection: Upgrade\r\n");
    out.put_slice(b"Sec-WebSocket-Accept: ");
    out.put_slice(accept.as_bytes());
    out.put_slice(b"\r\n\r\n");
    Ok(out.freeze())
}
