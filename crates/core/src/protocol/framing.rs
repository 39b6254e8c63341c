//! Reassembly of RTSP messages from a TCP byte stream.
//!
//! A single `read` may end in the middle of a status line, a header, or a
//! body, and may also carry several messages at once. [`ResponseFramer`]
//! buffers bytes and yields one complete message at a time:
//!
//! ```text
//!  AwaitingStatusLine --line--> AwaitingHeaders --blank line--> AwaitingBody
//!          ^                                                        |
//!          +-------------- Content-Length bytes consumed -----------+
//! ```
//!
//! Lines may end in `\r\n` or a bare `\n`. Blank lines between messages
//! are skipped, and interleaved binary frames (`$` + channel + 16-bit
//! length, RFC 2326 §10.12) are consumed and reported without payload.

use crate::error::{ParseErrorKind, Result};
use crate::protocol::response::{
    RtspResponse, StatusLine, find_header, is_status_version, parse_header_line,
};

/// One complete item extracted from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Response(RtspResponse),
    /// A request initiated by the server (e.g. `GET_PARAMETER` keepalive probes).
    Request(IncomingRequest),
    /// An interleaved data frame; the payload has been dropped.
    Interleaved { channel: u8, len: usize },
}

/// Start line and CSeq of a server-initiated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRequest {
    pub method: String,
    pub uri: String,
    pub cseq: Option<u32>,
}

#[derive(Debug)]
enum StartLine {
    Status(StatusLine),
    Request { method: String, uri: String },
    Malformed(ParseErrorKind),
}

/// A message whose start line and some headers have been read.
#[derive(Debug)]
struct Partial {
    start: StartLine,
    headers: Vec<(String, String)>,
    /// First header-level problem seen; reported once the message is consumed.
    error: Option<ParseErrorKind>,
}

#[derive(Debug)]
enum FrameState {
    AwaitingStatusLine,
    AwaitingHeaders(Partial),
    AwaitingBody { partial: Partial, body_len: usize },
}

/// Accumulation buffer plus framing state for one connection.
#[derive(Debug)]
pub struct ResponseFramer {
    buf: Vec<u8>,
    /// Offset of the first byte of `buf` not yet parsed into the current message.
    pos: usize,
    state: FrameState,
    max_header_len: usize,
    max_body_len: usize,
}

/// Default cap on a single message body.
pub const DEFAULT_MAX_BODY_LEN: usize = 4 * 1024 * 1024;

impl ResponseFramer {
    /// `max_header_len` caps how many bytes may be buffered while waiting for
    /// a line terminator; beyond it the buffer is discarded as malformed.
    pub fn new(max_header_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(4096),
            pos: 0,
            state: FrameState::AwaitingStatusLine,
            max_header_len,
            max_body_len: DEFAULT_MAX_BODY_LEN,
        }
    }

    /// Reject bodies longer than `max_body_len` with
    /// [`ParseErrorKind::BodyTooLarge`].
    pub fn with_max_body_len(mut self, max_body_len: usize) -> Self {
        self.max_body_len = max_body_len;
        self
    }

    /// Append received bytes to the accumulation buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes received but not yet consumed by a complete message.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next complete message, if one is fully buffered.
    ///
    /// `Ok(None)` means more bytes are needed. An `Err` means one malformed
    /// message was consumed and dropped; the framer stays usable and the
    /// caller should keep calling until `Ok(None)`. The exception is
    /// [`ParseErrorKind::BodyTooLarge`]: the buffer is discarded and the
    /// connection should be dropped.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            match std::mem::replace(&mut self.state, FrameState::AwaitingStatusLine) {
                FrameState::AwaitingStatusLine => {
                    self.skip_blank_lines();
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    if self.buf[0] == b'$' {
                        return Ok(self.take_interleaved());
                    }
                    let Some(line) = self.take_line()? else {
                        return Ok(None);
                    };
                    self.state = FrameState::AwaitingHeaders(Partial {
                        start: parse_start_line(&line),
                        headers: Vec::new(),
                        error: None,
                    });
                }
                FrameState::AwaitingHeaders(mut partial) => {
                    let Some(line) = self.take_line()? else {
                        self.state = FrameState::AwaitingHeaders(partial);
                        return Ok(None);
                    };
                    if line.is_empty() {
                        let body_len = partial.content_length();
                        if body_len > self.max_body_len {
                            self.buf.clear();
                            self.pos = 0;
                            return Err(ParseErrorKind::BodyTooLarge.into());
                        }
                        self.state = FrameState::AwaitingBody { partial, body_len };
                    } else {
                        match parse_header_line(&line) {
                            Ok(header) => partial.headers.push(header),
                            Err(_) => {
                                partial.error.get_or_insert(ParseErrorKind::InvalidHeader);
                            }
                        }
                        self.state = FrameState::AwaitingHeaders(partial);
                    }
                }
                FrameState::AwaitingBody { partial, body_len } => {
                    if self.buf.len() - self.pos < body_len {
                        self.state = FrameState::AwaitingBody { partial, body_len };
                        return Ok(None);
                    }
                    let end = self.pos + body_len;
                    let body = self.buf[self.pos..end].to_vec();
                    self.buf.drain(..end);
                    self.pos = 0;
                    return partial.finish(body).map(Some);
                }
            }
        }
    }

    fn skip_blank_lines(&mut self) {
        let blank = self
            .buf
            .iter()
            .take_while(|&&b| b == b'\r' || b == b'\n')
            .count();
        if blank > 0 {
            self.buf.drain(..blank);
        }
    }

    fn take_interleaved(&mut self) -> Option<Message> {
        if self.buf.len() < 4 {
            return None;
        }
        let channel = self.buf[1];
        let len = usize::from(u16::from_be_bytes([self.buf[2], self.buf[3]]));
        if self.buf.len() < 4 + len {
            return None;
        }
        self.buf.drain(..4 + len);
        Some(Message::Interleaved { channel, len })
    }

    /// Take the next line starting at `pos`, without its terminator.
    fn take_line(&mut self) -> Result<Option<String>> {
        match self.buf[self.pos..].iter().position(|&b| b == b'\n') {
            Some(offset) => {
                let end = self.pos + offset;
                let mut line = &self.buf[self.pos..end];
                if let Some(stripped) = line.strip_suffix(b"\r") {
                    line = stripped;
                }
                let line = String::from_utf8_lossy(line).into_owned();
                self.pos = end + 1;
                Ok(Some(line))
            }
            None if self.buf.len() > self.max_header_len => {
                self.buf.clear();
                self.pos = 0;
                self.state = FrameState::AwaitingStatusLine;
                Err(ParseErrorKind::HeaderTooLarge.into())
            }
            None => Ok(None),
        }
    }
}

fn parse_start_line(line: &str) -> StartLine {
    let mut tokens = line.split_whitespace();
    let first = tokens.next().unwrap_or("");
    if is_status_version(first) {
        return match StatusLine::parse(line) {
            Ok(status) => StartLine::Status(status),
            Err(crate::RtspError::Parse { kind }) => StartLine::Malformed(kind),
            Err(_) => StartLine::Malformed(ParseErrorKind::InvalidStatusLine),
        };
    }
    match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(uri), Some(version), None) if version.starts_with("RTSP/") => StartLine::Request {
            method: first.to_string(),
            uri: uri.to_string(),
        },
        _ => StartLine::Malformed(ParseErrorKind::InvalidStatusLine),
    }
}

impl Partial {
    fn content_length(&mut self) -> usize {
        match find_header(&self.headers, "Content-Length") {
            None => 0,
            Some(raw) => match raw.parse() {
                Ok(len) => len,
                Err(_) => {
                    self.error.get_or_insert(ParseErrorKind::InvalidContentLength);
                    0
                }
            },
        }
    }

    fn finish(self, body: Vec<u8>) -> Result<Message> {
        let status = match self.start {
            StartLine::Malformed(kind) => return Err(kind.into()),
            _ if self.error.is_some() => {
                return Err(self.error.unwrap_or(ParseErrorKind::InvalidHeader).into());
            }
            StartLine::Status(status) => status,
            StartLine::Request { method, uri } => {
                let cseq = find_header(&self.headers, "CSeq").and_then(|v| v.parse().ok());
                return Ok(Message::Request(IncomingRequest { method, uri, cseq }));
            }
        };
        Ok(Message::Response(RtspResponse::new(status, self.headers, body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RtspError;

    fn response(msg: Option<Message>) -> RtspResponse {
        match msg {
            Some(Message::Response(resp)) => resp,
            other => panic!("expected a response, got {other:?}"),
        }
    }

    #[test]
    fn single_response_without_body() {
        let mut framer = ResponseFramer::new(1024);
        framer.extend(b"RTSP/1.0 200 OK\r\nCSeq: 2\r\nPublic: OPTIONS, DESCRIBE\r\n\r\n");
        let resp = response(framer.next_message().unwrap());
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.reason, "OK");
        assert_eq!(resp.cseq(), Some(2));
        assert!(resp.body.is_empty());
        assert!(framer.next_message().unwrap().is_none());
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn split_after_status_line_waits_for_rest() {
        let mut framer = ResponseFramer::new(1024);
        framer.extend(b"RTSP/1.0 200 OK\r\n");
        assert!(framer.next_message().unwrap().is_none());
        framer.extend(b"CSeq: 3\r\n\r\n");
        assert_eq!(response(framer.next_message().unwrap()).cseq(), Some(3));
    }

    #[test]
    fn partial_body_is_not_delivered() {
        let sdp = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\n";
        let head = format!(
            "RTSP/1.0 200 OK\r\nCSeq: 4\r\nContent-Type: application/sdp\r\nContent-Length: {}\r\n\r\n",
            sdp.len()
        );
        let mut framer = ResponseFramer::new(1024);
        framer.extend(head.as_bytes());
        framer.extend(&sdp.as_bytes()[..5]);
        assert!(framer.next_message().unwrap().is_none());
        framer.extend(&sdp.as_bytes()[5..]);
        let resp = response(framer.next_message().unwrap());
        assert_eq!(resp.body_text(), sdp);
    }

    #[test]
    fn byte_at_a_time() {
        let raw = b"RTSP/1.0 404 Not Found\nCSeq: 9\nContent-Length: 2\n\nhi";
        let mut framer = ResponseFramer::new(1024);
        let mut seen = Vec::new();
        for &b in raw.iter() {
            framer.extend(&[b]);
            while let Some(msg) = framer.next_message().unwrap() {
                seen.push(msg);
            }
        }
        assert_eq!(seen.len(), 1);
        let resp = response(seen.pop());
        assert_eq!(resp.status_code, 404);
        assert_eq!(resp.reason, "Not Found");
        assert_eq!(resp.body, b"hi");
    }

    #[test]
    fn coalesced_responses_in_one_read() {
        let mut framer = ResponseFramer::new(1024);
        framer.extend(
            b"RTSP/1.0 200 OK\r\nCSeq: 2\r\n\r\nRTSP/1.0 200 OK\r\nCSeq: 3\r\nContent-Length: 3\r\n\r\nabc\r\nRTSP/1.0 2",
        );
        assert_eq!(response(framer.next_message().unwrap()).cseq(), Some(2));
        let second = response(framer.next_message().unwrap());
        assert_eq!(second.cseq(), Some(3));
        assert_eq!(second.body, b"abc");
        assert!(framer.next_message().unwrap().is_none());
        framer.extend(b"00 OK\r\nCSeq: 4\r\n\r\n");
        assert_eq!(response(framer.next_message().unwrap()).cseq(), Some(4));
    }

    #[test]
    fn malformed_status_line_drops_only_that_message() {
        let mut framer = ResponseFramer::new(1024);
        framer.extend(
            b"RTSP/1.0 abc Broken\r\nCSeq: 2\r\nContent-Length: 4\r\n\r\nxxxxRTSP/1.0 200 OK\r\nCSeq: 3\r\n\r\n",
        );
        assert!(matches!(
            framer.next_message(),
            Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidStatusCode
            })
        ));
        assert_eq!(response(framer.next_message().unwrap()).cseq(), Some(3));
    }

    #[test]
    fn bad_header_and_content_length_are_reported() {
        let mut framer = ResponseFramer::new(1024);
        framer.extend(b"RTSP/1.0 200 OK\r\nCSeq 2\r\n\r\nRTSP/1.0 200 OK\r\nCSeq: 3\r\nContent-Length: -1\r\n\r\n");
        assert!(matches!(
            framer.next_message(),
            Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader
            })
        ));
        assert!(matches!(
            framer.next_message(),
            Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidContentLength
            })
        ));
        assert!(framer.next_message().unwrap().is_none());
    }

    #[test]
    fn interleaved_frames_are_skipped() {
        let mut framer = ResponseFramer::new(1024);
        framer.extend(&[b'$', 0, 0, 3, 1, 2]);
        assert!(framer.next_message().unwrap().is_none());
        framer.extend(&[3]);
        framer.extend(b"RTSP/1.0 200 OK\r\nCSeq: 5\r\n\r\n");
        assert_eq!(
            framer.next_message().unwrap(),
            Some(Message::Interleaved { channel: 0, len: 3 })
        );
        assert_eq!(response(framer.next_message().unwrap()).cseq(), Some(5));
    }

    #[test]
    fn server_request_is_recognized() {
        let mut framer = ResponseFramer::new(1024);
        framer.extend(b"GET_PARAMETER rtsp://cam/s RTSP/1.0\r\nCSeq: 7\r\n\r\n");
        assert_eq!(
            framer.next_message().unwrap(),
            Some(Message::Request(IncomingRequest {
                method: "GET_PARAMETER".to_string(),
                uri: "rtsp://cam/s".to_string(),
                cseq: Some(7),
            }))
        );
    }

    #[test]
    fn oversized_header_block_is_discarded() {
        let mut framer = ResponseFramer::new(16);
        framer.extend(b"RTSP/1.0 200 OK\r\nX-Padding: aaaaaaaaaaaaaaaaaaaaaaaa");
        assert!(matches!(
            framer.next_message(),
            Err(RtspError::Parse {
                kind: ParseErrorKind::HeaderTooLarge
            })
        ));
        assert_eq!(framer.buffered_len(), 0);
        framer.extend(b"RTSP/1.0 200 OK\r\nCSeq: 8\r\n\r\n");
        assert_eq!(response(framer.next_message().unwrap()).cseq(), Some(8));
    }

    #[test]
    fn huge_content_length_is_rejected() {
        let mut framer = ResponseFramer::new(1024).with_max_body_len(64 * 1024);
        framer.extend(b"RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-Length: 4000000000\r\n\r\n");
        framer.extend(&vec![b'x'; 1024]);
        framer.extend(b"RTSP/1.0 200 OK\r\nCSeq: 3\r\n\r\n");
        assert!(matches!(
            framer.next_message(),
            Err(RtspError::Parse {
                kind: ParseErrorKind::BodyTooLarge
            })
        ));
        assert_eq!(framer.buffered_len(), 0);
        assert!(framer.next_message().unwrap().is_none());
    }

    #[test]
    fn body_at_the_cap_is_accepted() {
        let mut framer = ResponseFramer::new(1024).with_max_body_len(4);
        framer.extend(b"RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-Length: 4\r\n\r\nabcd");
        assert_eq!(response(framer.next_message().unwrap()).body, b"abcd");
    }
}
