//! WebSocket upgrade detection (RFC 6455 §4.2.1).

use super::parser::Request;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// The only WebSocket protocol version this server speaks.
pub const WEBSOCKET_VERSION: &str = "13";

/// Check whether a completed request asks to switch to WebSocket.
pub fn is_upgrade_request(request: &Request) -> bool {
    upgrade_rejection(request).is_none()
}

/// Explain why a request is not a valid upgrade, or `None` if it is one.
pub fn upgrade_rejection(request: &Request) -> Option<&'static str> {
    if request.method != "GET" {
        return Some("method is not GET");
    }
    if request.version != 1 {
        return Some("HTTP version is not 1.1");
    }
    if !request
        .header("upgrade")
        .is_some_and(|v| has_token(v, "websocket"))
    {
        return Some("missing Upgrade: websocket");
    }
    if !request
        .header("connection")
        .is_some_and(|v| has_token(v, "upgrade"))
    {
        return Some("missing Connection: upgrade");
    }
    if request.header("sec-websocket-version") != Some(WEBSOCKET_VERSION) {
        return Some("unsupported Sec-WebSocket-Version");
    }
    match request.header("sec-websocket-key") {
        Some(key) if is_valid_key(key) => None,
        Some(_) => Some("malformed Sec-WebSocket-Key"),
        None => Some("missing Sec-WebSocket-Key"),
    }
}

/// A comma-separated header value contains `token` (case-insensitive).
fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

/// The key must be base64 of a 16-byte nonce.
fn is_valid_key(key: &str) -> bool {
    BASE64.decode(key).is_ok_and(|nonce| nonce.len() == 16)
}
