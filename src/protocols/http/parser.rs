//! Incremental HTTP/1.x request parser.
//!
//! Bytes are accumulated across reads and re-scanned with `httparse` until the
//! header block is complete. Anything after the blank line that ends the
//! headers is kept aside so the caller can hand it to the next protocol.

use bytes::BytesMut;
use thiserror::Error;

/// Maximum number of headers accepted in a single request.
pub const MAX_HEADERS: usize = 64;

/// A parsed request head (request line and headers, no body).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Request target as sent by the client.
    pub path: String,
    /// Minor HTTP version (`1` for HTTP/1.1).
    pub version: u8,
    /// Headers in the order they were received.
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// Look up a header value by name (case-insensitive). Returns the first match.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Errors that make a request unparseable.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The bytes are not a valid HTTP request head.
    #[error("invalid request: {0}")]
    Syntax(#[from] httparse::Error),

    /// The request head grew past the configured limit.
    #[error("request too large: {size} bytes (max: {max})")]
    TooLarge {
        /// Bytes buffered so far.
        size: usize,
        /// Maximum allowed.
        max: usize,
    },
}

/// Parse result.
#[derive(Debug)]
pub enum ParseResult {
    /// The request head is complete.
    Complete(Request),
    /// Need more data.
    Incomplete,
    /// The request cannot be parsed.
    Error(ParseError),
}

/// Accumulating parser for a single request head.
#[derive(Debug)]
pub struct RequestParser {
    buf: BytesMut,
    /// Offset of the first byte after the header block, once known.
    head_len: Option<usize>,
    max_size: usize,
}

impl RequestParser {
    /// Create a parser that rejects request heads larger than `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            head_len: None,
            max_size,
        }
    }

    /// Append `input` and try to complete the request head.
    pub fn feed(&mut self, input: &[u8]) -> ParseResult {
        self.buf.extend_from_slice(input);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        match req.parse(&self.buf) {
            Ok(httparse::Status::Complete(head_len)) => {
                if head_len > self.max_size {
                    return ParseResult::Error(ParseError::TooLarge {
                        size: head_len,
                        max: self.max_size,
                    });
                }
                self.head_len = Some(head_len);

                let request = Request {
                    method: req.method.unwrap_or_default().to_string(),
                    path: req.path.unwrap_or_default().to_string(),
                    version: req.version.unwrap_or(1),
                    headers: req
                        .headers
                        .iter()
                        .map(|h| {
                            (
                                h.name.to_string(),
                                String::from_utf8_lossy(h.value).trim().to_string(),
                            )
                        })
                        .collect(),
                };
                ParseResult::Complete(request)
            }
            Ok(httparse::Status::Partial) => {
                if self.buf.len() > self.max_size {
                    ParseResult::Error(ParseError::TooLarge {
                        size: self.buf.len(),
                        max: self.max_size,
                    })
                } else {
                    ParseResult::Incomplete
                }
            }
            Err(e) => ParseResult::Error(e.into()),
        }
    }

    /// Number of bytes buffered so far.
    #[cfg(test)]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Take the bytes that followed the request head.
    ///
    /// Before the head is complete there is no boundary, so nothing is returned.
    pub fn take_remainder(&mut self) -> BytesMut {
        match self.head_len {
            Some(head_len) => self.buf.split_off(head_len),
            None => BytesMut::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPGRADE: &[u8] = b"GET /chat HTTP/1.1\r\n\
        Host: example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn test_parse_complete() {
        let mut parser = RequestParser::new(8192);
        match parser.feed(UPGRADE) {
            ParseResult::Complete(req) => {
                assert_eq!(req.method, "GET");
                assert_eq!(req.path, "/chat");
                assert_eq!(req.version, 1);
                assert_eq!(req.header("upgrade"), Some("websocket"));
                assert_eq!(req.header("SEC-WEBSOCKET-VERSION"), Some("13"));
                assert_eq!(req.header("origin"), None);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(parser.take_remainder().is_empty());
    }

    #[test]
    fn test_parse_split_mid_line() {
        let mut parser = RequestParser::new(8192);
        let (first, second) = UPGRADE.split_at(40);

        assert!(matches!(parser.feed(first), ParseResult::Incomplete));
        assert_eq!(parser.buffered(), 40);
        assert!(matches!(parser.feed(second), ParseResult::Complete(_)));
    }

    #[test]
    fn test_remainder_after_head() {
        let mut parser = RequestParser::new(8192);
        let mut input = UPGRADE.to_vec();
        input.extend_from_slice(&[0x81, 0x85, 1, 2, 3]);

        assert!(matches!(parser.feed(&input), ParseResult::Complete(_)));
        assert_eq!(&parser.take_remainder()[..], &[0x81, 0x85, 1, 2, 3]);
    }

    #[test]
    fn test_remainder_before_complete() {
        let mut parser = RequestParser::new(8192);
        assert!(matches!(parser.feed(b"GET / HT"), ParseResult::Incomplete));
        assert!(parser.take_remainder().is_empty());
    }

    #[test]
    fn test_syntax_error() {
        let mut parser = RequestParser::new(8192);
        match parser.feed(b"GET / HTTP/1.1\r\nBad Header\r\n\r\n") {
            ParseResult::Error(ParseError::Syntax(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_too_large_partial() {
        let mut parser = RequestParser::new(32);
        assert!(matches!(parser.feed(b"GET / HTTP/1.1\r\n"), ParseResult::Incomplete));
        match parser.feed(b"X-Padding: aaaaaaaaaaaaaaaaaaaaaaa\r\n") {
            ParseResult::Error(ParseError::TooLarge { max: 32, .. }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_too_many_headers() {
        let mut parser = RequestParser::new(64 * 1024);
        let mut input = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..=MAX_HEADERS {
            input.extend_from_slice(format!("X-H{i}: v\r\n").as_bytes());
        }
        input.extend_from_slice(b"\r\n");

        assert!(matches!(
            parser.feed(&input),
            ParseResult::Error(ParseError::Syntax(httparse::Error::TooManyHeaders))
        ));
    }
}
