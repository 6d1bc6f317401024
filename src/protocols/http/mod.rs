//! Minimal HTTP/1.1 support.
//!
//! Only enough of HTTP is implemented to recognize a WebSocket upgrade:
//! - `parser`: incremental request-head parser over `httparse`
//! - `upgrade`: upgrade-request validation
//!
//! Requests that are not upgrades are refused with [`response::BAD_REQUEST`].

pub mod parser;
pub mod upgrade;

pub use parser::{ParseError, ParseResult, Request, RequestParser};
pub use upgrade::{is_upgrade_request, upgrade_rejection};

/// Canned responses.
pub mod response {
    /// Sent once, best-effort, before dropping a refused request.
    pub const BAD_REQUEST: &[u8] =
        b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";
}
