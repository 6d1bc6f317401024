//! Protocol processing for the event loop.
//!
//! Turns bytes read from a socket into queued response bytes without touching
//! the socket itself. A connection first passes through the upgrade gate
//! (HTTP) and then stays in the echo loop (WebSocket) until it closes.

use crate::error::ConnError;
use crate::protocols::http::{self, is_upgrade_request, upgrade_rejection, RequestParser};
use crate::protocols::websocket::{self, encode_frame, FrameParser, OpCode};
use crate::runtime::buffer::OutboundQueue;
use crate::runtime::connection::{ConnectionState, Mode};
use bytes::BytesMut;
use tracing::{debug, trace};

/// Why a connection ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent a Close frame and it was acknowledged.
    ClosedByPeer,
    /// The peer shut down its side of the socket.
    EndOfStream,
}

/// Result of processing one chunk of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Keep reading.
    Open,
    /// Stop reading; close once queued output is flushed.
    Closing(CloseReason),
}

/// Feed bytes read from the socket through the connection's current mode.
///
/// Responses are appended to `out`. Bytes that follow a completed upgrade
/// request in the same chunk are handed to the frame parser before returning.
pub fn process(
    state: &mut ConnectionState,
    input: &[u8],
    out: &mut OutboundQueue,
) -> Result<Progress, ConnError> {
    let leftover = match &mut state.mode {
        Mode::WebSocketActive(frames) => return echo(frames, input, out),
        Mode::AwaitingHttpUpgrade(parser) => match upgrade(parser, input, out)? {
            Some(leftover) => leftover,
            None => return Ok(Progress::Open),
        },
    };

    let mut frames = FrameParser::with_buffered(leftover, state.limits().max_frame_size);
    let progress = echo(&mut frames, &[], out);
    state.switch_to_websocket(frames);
    progress
}

/// Run the upgrade gate. Returns the bytes that followed the request head once
/// the handshake response is queued, or `None` while the head is incomplete.
fn upgrade(
    parser: &mut RequestParser,
    input: &[u8],
    out: &mut OutboundQueue,
) -> Result<Option<BytesMut>, ConnError> {
    let request = match parser.feed(input) {
        http::ParseResult::Incomplete => return Ok(None),
        http::ParseResult::Error(e) => return Err(e.into()),
        http::ParseResult::Complete(request) => request,
    };

    if !is_upgrade_request(&request) {
        let reason = upgrade_rejection(&request).unwrap_or("not an upgrade request");
        return Err(ConnError::UnsupportedRequest(reason));
    }
    out.enqueue(&websocket::handshake_response(&request)?)?;

    let leftover = parser.take_remainder();
    debug!(
        path = %request.path,
        leftover = leftover.len(),
        "Upgraded to WebSocket"
    );
    Ok(Some(leftover))
}

/// Decode every complete frame available and queue the replies.
fn echo(
    frames: &mut FrameParser,
    input: &[u8],
    out: &mut OutboundQueue,
) -> Result<Progress, ConnError> {
    let mut chunk = input;
    loop {
        let frame = match frames.feed(chunk) {
            websocket::ParseResult::Incomplete => return Ok(Progress::Open),
            websocket::ParseResult::Error(e) => return Err(e.into()),
            websocket::ParseResult::Complete(frame) => frame,
        };
        chunk = &[];

        trace!(opcode = ?frame.opcode, len = frame.payload.len(), "Frame received");

        match frame.opcode {
            OpCode::Close => {
                out.enqueue(&encode_frame(OpCode::Close, true, &[]))?;
                return Ok(Progress::Closing(CloseReason::ClosedByPeer));
            }
            OpCode::Text | OpCode::Binary if frame.fin => {
                out.enqueue(&encode_frame(frame.opcode, true, &frame.payload))?;
            }
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                return Err(ConnError::Fragmented);
            }
            other => return Err(ConnError::UnsupportedFrame(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::protocols::http::ParseError;
    use crate::protocols::websocket::frame::encode_masked;
    use crate::protocols::websocket::FrameError;

    const MASK: [u8; 4] = [0xa1, 0x02, 0x5c, 0xee];

    const UPGRADE: &[u8] = b"GET /echo HTTP/1.1\r\n\
        Host: localhost:4567\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    const HANDSHAKE: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";

    fn fresh() -> (ConnectionState, OutboundQueue) {
        let limits = Limits::default();
        (
            ConnectionState::new(limits),
            OutboundQueue::new(limits.max_outbound_size),
        )
    }

    fn upgraded() -> (ConnectionState, OutboundQueue) {
        let (mut state, mut out) = fresh();
        process(&mut state, UPGRADE, &mut out).unwrap();
        let out = OutboundQueue::new(state.limits().max_outbound_size);
        (state, out)
    }

    fn text(payload: &[u8]) -> Vec<u8> {
        encode_masked(OpCode::Text, true, payload, MASK)
    }

    /// Feed `input` in `chunk`-sized pieces, stopping once the connection closes.
    fn run_chunked(input: &[u8], chunk: usize) -> (ConnectionState, Vec<u8>, Progress) {
        let (mut state, mut out) = fresh();
        let mut progress = Progress::Open;
        for piece in input.chunks(chunk) {
            progress = process(&mut state, piece, &mut out).unwrap();
            if progress != Progress::Open {
                break;
            }
        }
        (state, out.pending().to_vec(), progress)
    }

    #[test]
    fn test_upgrade_in_one_write() {
        let (mut state, mut out) = fresh();

        let progress = process(&mut state, UPGRADE, &mut out).unwrap();
        assert_eq!(progress, Progress::Open);
        assert_eq!(out.pending(), HANDSHAKE);
        assert!(state.is_websocket());
    }

    #[test]
    fn test_echo_text_hello() {
        let (mut state, mut out) = upgraded();

        let progress = process(&mut state, &text(b"hello"), &mut out).unwrap();
        assert_eq!(progress, Progress::Open);
        assert_eq!(out.pending(), b"\x81\x05hello");
    }

    #[test]
    fn test_echo_binary_keeps_opcode_and_length() {
        let (mut state, mut out) = upgraded();
        let payload = vec![0xABu8; 1000];

        let input = encode_masked(OpCode::Binary, true, &payload, MASK);
        process(&mut state, &input, &mut out).unwrap();

        let expected = encode_frame(OpCode::Binary, true, &payload);
        assert_eq!(out.pending(), &expected[..]);
        assert_eq!(&out.pending()[..4], &[0x82, 126, 0x03, 0xE8]);
    }

    #[test]
    fn test_close_round_trip() {
        let (mut state, mut out) = upgraded();

        let mut input = encode_masked(OpCode::Close, true, &[0x03, 0xE8], MASK);
        // Anything after the close frame is ignored.
        input.extend(text(b"late"));

        let progress = process(&mut state, &input, &mut out).unwrap();
        assert_eq!(progress, Progress::Closing(CloseReason::ClosedByPeer));
        assert_eq!(out.pending(), &[0x88, 0x00]);
    }

    #[test]
    fn test_upgrade_split_mid_line() {
        let (mut state, mut out) = fresh();
        let split = UPGRADE
            .windows(7)
            .position(|w| w == b"Upgrade")
            .unwrap()
            + 3;

        assert_eq!(
            process(&mut state, &UPGRADE[..split], &mut out).unwrap(),
            Progress::Open
        );
        assert!(!state.is_websocket());
        assert!(out.is_empty());

        process(&mut state, &UPGRADE[split..], &mut out).unwrap();
        assert!(state.is_websocket());
        assert_eq!(out.pending(), HANDSHAKE);
    }

    #[test]
    fn test_upgrade_and_frame_in_same_chunk() {
        let (mut state, mut out) = fresh();
        let mut input = UPGRADE.to_vec();
        input.extend(text(b"hello"));

        process(&mut state, &input, &mut out).unwrap();

        let mut expected = HANDSHAKE.to_vec();
        expected.extend_from_slice(b"\x81\x05hello");
        assert_eq!(out.pending(), &expected[..]);
    }

    #[test]
    fn test_close_in_upgrade_chunk() {
        let (mut state, mut out) = fresh();
        let mut input = UPGRADE.to_vec();
        input.extend(encode_masked(OpCode::Close, true, b"", MASK));

        let progress = process(&mut state, &input, &mut out).unwrap();
        assert_eq!(progress, Progress::Closing(CloseReason::ClosedByPeer));
        assert!(state.is_websocket());

        let mut expected = HANDSHAKE.to_vec();
        expected.extend_from_slice(&[0x88, 0x00]);
        assert_eq!(out.pending(), &expected[..]);
    }

    #[test]
    fn test_partial_frame_after_upgrade_is_kept() {
        let (mut state, mut out) = fresh();
        let frame = text(b"hello");
        let mut input = UPGRADE.to_vec();
        input.extend_from_slice(&frame[..3]);

        process(&mut state, &input, &mut out).unwrap();
        assert_eq!(out.pending(), HANDSHAKE);

        process(&mut state, &frame[3..], &mut out).unwrap();
        assert!(out.pending().ends_with(b"\x81\x05hello"));
    }

    #[test]
    fn test_chunk_size_independence() {
        let mut input = UPGRADE.to_vec();
        input.extend(text(b"hello"));
        input.extend(encode_masked(OpCode::Binary, true, &[7u8; 300], MASK));
        input.extend(text(b""));
        input.extend(encode_masked(OpCode::Close, true, b"", MASK));

        let (whole_state, whole_out, whole_progress) = run_chunked(&input, input.len());
        assert_eq!(whole_progress, Progress::Closing(CloseReason::ClosedByPeer));
        assert!(whole_state.is_websocket());

        for chunk in [1, 2, 3, 7, 64, 1024] {
            let (state, out, progress) = run_chunked(&input, chunk);
            assert_eq!(out, whole_out, "chunk size {chunk}");
            assert_eq!(progress, whole_progress, "chunk size {chunk}");
            assert!(state.is_websocket());
        }
    }

    #[test]
    fn test_no_second_transition() {
        let (mut state, mut out) = upgraded();

        // A second upgrade request is just bytes to the frame parser now.
        let err = process(&mut state, UPGRADE, &mut out).unwrap_err();
        assert!(matches!(err, ConnError::MalformedFrame(_)));
        assert!(state.is_websocket());
        assert!(out.is_empty());
    }

    #[test]
    fn test_plain_http_request_is_unsupported() {
        let (mut state, mut out) = fresh();
        let err = process(
            &mut state,
            b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n",
            &mut out,
        )
        .unwrap_err();

        assert!(matches!(err, ConnError::UnsupportedRequest(_)));
        assert!(err.http_response().is_some());
        assert!(!state.is_websocket());
        assert!(out.is_empty());
    }

    #[test]
    fn test_malformed_request() {
        let (mut state, mut out) = fresh();
        let err = process(&mut state, b"\x00\x01garbage\r\n\r\n", &mut out).unwrap_err();
        assert!(matches!(
            err,
            ConnError::MalformedRequest(ParseError::Syntax(_))
        ));
    }

    #[test]
    fn test_ping_is_unsupported() {
        let (mut state, mut out) = upgraded();
        let input = encode_masked(OpCode::Ping, true, b"are you there", MASK);

        let err = process(&mut state, &input, &mut out).unwrap_err();
        assert!(matches!(err, ConnError::UnsupportedFrame(OpCode::Ping)));
    }

    #[test]
    fn test_fragmented_message_is_unsupported() {
        let (mut state, mut out) = upgraded();
        let input = encode_masked(OpCode::Text, false, b"hel", MASK);

        let err = process(&mut state, &input, &mut out).unwrap_err();
        assert!(matches!(err, ConnError::Fragmented));
    }

    #[test]
    fn test_oversized_frame() {
        let limits = Limits {
            max_frame_size: 16,
            ..Limits::default()
        };
        let mut state = ConnectionState::new(limits);
        let mut out = OutboundQueue::new(limits.max_outbound_size);
        process(&mut state, UPGRADE, &mut out).unwrap();

        let err = process(&mut state, &text(&[b'x'; 17]), &mut out).unwrap_err();
        assert!(matches!(
            err,
            ConnError::MalformedFrame(FrameError::TooLarge { len: 17, max: 16 })
        ));
    }

    #[test]
    fn test_outbound_overflow() {
        let limits = Limits::default();
        let mut state = ConnectionState::new(limits);
        let mut out = OutboundQueue::new(HANDSHAKE.len() + 8);
        process(&mut state, UPGRADE, &mut out).unwrap();

        let err = process(&mut state, &text(b"0123456789"), &mut out).unwrap_err();
        assert!(matches!(err, ConnError::OutboundOverflow { .. }));
    }
}
