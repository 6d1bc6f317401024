//! WebSocket frame codec (RFC 6455 §5.2).
//!
//! Decoding is incremental: the parser buffers bytes until a whole frame is
//! available, then yields it with the client mask already removed. Encoding
//! always produces unmasked server frames.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

const FIN: u8 = 0x80;
const RSV_MASK: u8 = 0x70;
const OPCODE_MASK: u8 = 0x0f;
const MASK_BIT: u8 = 0x80;
const LEN_MASK: u8 = 0x7f;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

/// WebSocket operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Continuation of a fragmented message.
    Continuation,
    /// UTF-8 text data.
    Text,
    /// Binary data.
    Binary,
    /// Connection close.
    Close,
    /// Ping.
    Ping,
    /// Pong.
    Pong,
}

impl OpCode {
    /// Control frames are Close, Ping and Pong.
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(FrameError::ReservedOpcode(other)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(value: OpCode) -> Self {
        match value {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a message.
    pub fin: bool,
    /// Frame type.
    pub opcode: OpCode,
    /// Unmasked payload.
    pub payload: Bytes,
}

/// Frame decoding errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// RSV1-3 set without a negotiated extension.
    #[error("reserved bits set")]
    ReservedBits,

    /// Opcode outside the RFC 6455 set.
    #[error("reserved opcode {0:#x}")]
    ReservedOpcode(u8),

    /// Client frames must be masked.
    #[error("client frame is not masked")]
    Unmasked,

    /// Control frames cannot be fragmented.
    #[error("fragmented control frame")]
    FragmentedControl,

    /// Control frame payload over 125 bytes.
    #[error("control frame payload too long: {0} bytes")]
    ControlTooLong(u64),

    /// 64-bit length with the most significant bit set.
    #[error("invalid payload length")]
    InvalidLength,

    /// Payload larger than the configured limit.
    #[error("frame too large: {len} bytes (max: {max})")]
    TooLarge {
        /// Declared payload length.
        len: u64,
        /// Maximum allowed.
        max: usize,
    },
}

/// Parse result.
#[derive(Debug)]
pub enum ParseResult {
    /// A whole frame was decoded and removed from the buffer.
    Complete(Frame),
    /// Need more data.
    Incomplete,
    /// The stream is not valid WebSocket framing.
    Error(FrameError),
}

/// Accumulating frame decoder for one connection.
#[derive(Debug)]
pub struct FrameParser {
    buf: BytesMut,
    max_payload: usize,
}

impl FrameParser {
    /// Create a parser that rejects payloads larger than `max_payload` bytes.
    #[cfg(test)]
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_payload,
        }
    }

    /// Create a parser pre-loaded with bytes already read from the socket.
    pub fn with_buffered(buf: BytesMut, max_payload: usize) -> Self {
        Self { buf, max_payload }
    }

    /// Append `input` and try to decode the next frame.
    ///
    /// Call again with an empty slice to drain further frames that are
    /// already buffered.
    pub fn feed(&mut self, input: &[u8]) -> ParseResult {
        self.buf.extend_from_slice(input);
        self.decode()
    }

    /// Number of bytes buffered but not yet decoded.
    #[cfg(test)]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn decode(&mut self) -> ParseResult {
        if self.buf.len() < 2 {
            return ParseResult::Incomplete;
        }

        let b0 = self.buf[0];
        let b1 = self.buf[1];

        if b0 & RSV_MASK != 0 {
            return ParseResult::Error(FrameError::ReservedBits);
        }
        let opcode = match OpCode::try_from(b0 & OPCODE_MASK) {
            Ok(opcode) => opcode,
            Err(e) => return ParseResult::Error(e),
        };
        let fin = b0 & FIN != 0;
        if b1 & MASK_BIT == 0 {
            return ParseResult::Error(FrameError::Unmasked);
        }

        let (len, header_len) = match b1 & LEN_MASK {
            126 => {
                if self.buf.len() < 4 {
                    return ParseResult::Incomplete;
                }
                (u16::from_be_bytes([self.buf[2], self.buf[3]]) as u64, 4)
            }
            127 => {
                if self.buf.len() < 10 {
                    return ParseResult::Incomplete;
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&self.buf[2..10]);
                let len = u64::from_be_bytes(raw);
                if len >> 63 != 0 {
                    return ParseResult::Error(FrameError::InvalidLength);
                }
                (len, 10)
            }
            n => (n as u64, 2),
        };

        if opcode.is_control() {
            if !fin {
                return ParseResult::Error(FrameError::FragmentedControl);
            }
            if len > MAX_CONTROL_PAYLOAD {
                return ParseResult::Error(FrameError::ControlTooLong(len));
            }
        }
        if len > self.max_payload as u64 {
            return ParseResult::Error(FrameError::TooLarge {
                len,
                max: self.max_payload,
            });
        }

        let len = len as usize;
        let total = header_len + 4 + len;
        if self.buf.len() < total {
            self.buf.reserve(total - self.buf.len());
            return ParseResult::Incomplete;
        }

        let mut mask = [0u8; 4];
        mask.copy_from_slice(&self.buf[header_len..header_len + 4]);
        self.buf.advance(header_len + 4);

        let mut payload = self.buf.split_to(len);
        apply_mask(&mut payload, mask);

        ParseResult::Complete(Frame {
            fin,
            opcode,
            payload: payload.freeze(),
        })
    }
}

fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Encode an unmasked server frame.
pub fn encode_frame(opcode: OpCode, fin: bool, payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(10 + payload.len());
    let b0 = u8::from(opcode) | if fin { FIN } else { 0 };
    out.put_u8(b0);

    let len = payload.len();
    if len < 126 {
        out.put_u8(len as u8);
    } else if len <= u16::MAX as usize {
        out.put_u8(126);
        out.put_u16(len as u16);
    } else {
        out.put_u8(127);
        out.put_u64(len as u64);
    }

    out.extend_from_slice(payload);
    out.freeze()
}

/// Encode a masked client frame.
#[cfg(test)]
pub(crate) fn encode_masked(opcode: OpCode, fin: bool, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    let unmasked = encode_frame(opcode, fin, payload);
    let header_len = unmasked.len() - payload.len();

    let mut out = unmasked[..header_len].to_vec();
    out[1] |= MASK_BIT;
    out.extend_from_slice(&mask);
    let mut body = payload.to_vec();
    apply_mask(&mut body, mask);
    out.extend_from_slice(&body);
    out
}
