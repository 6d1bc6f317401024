//! Protocol implementations.
//!
//! Each protocol exposes an incremental parser used by the runtime:
//! - `http`: request-head parsing and upgrade detection
//! - `websocket`: opening handshake and frame codec

pub mod http;
pub mod websocket;
