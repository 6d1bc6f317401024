//! WebSocket protocol support (RFC 6455).
//!
//! - `handshake`: `Sec-WebSocket-Accept` computation and the 101 response
//! - `frame`: incremental frame decoder and server frame encoder
//!
//! Extensions, subprotocols and message fragmentation are not negotiated.

pub mod frame;
pub mod handshake;

pub use frame::{encode_frame, FrameError, FrameParser, OpCode, ParseResult};
pub use handshake::{handshake_response, HandshakeError};
