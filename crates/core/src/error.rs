//! Error types for the RTSP client library.

use std::fmt;
use std::net::SocketAddr;

/// Errors that can occur in the RTSP client library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **URL**: [`InvalidUrl`](Self::InvalidUrl), [`UrlTooLong`](Self::UrlTooLong),
///   [`BadPort`](Self::BadPort).
/// - **Connection**: [`Resolve`](Self::Resolve),
///   [`ConnectFailure`](Self::ConnectFailure),
///   [`WriteFailure`](Self::WriteFailure),
///   [`ConnectionLost`](Self::ConnectionLost), [`Closed`](Self::Closed).
/// - **Protocol**: [`Parse`](Self::Parse), a malformed RTSP response.
/// - **Per request**: [`Timeout`](Self::Timeout),
///   [`TunnelFailure`](Self::TunnelFailure).
///
/// Once a command has been issued, none of these are returned to the
/// caller directly: they reach the command's handler as a
/// [`Reply`](crate::Reply) with code 0 and the error's display text.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The URL is not of the form `rtsp://[user:pass@]host[:port][/path]`.
    #[error("invalid RTSP URL: {0}")]
    InvalidUrl(String),

    /// The URL exceeds the configured length cap.
    #[error("URL is too long ({len} > {max} characters)")]
    UrlTooLong { len: usize, max: usize },

    /// The port is not an integer in `1..=65535`.
    #[error("bad port number: {0:?}")]
    BadPort(String),

    /// The server host name did not resolve to any address.
    #[error("failed to resolve {0}")]
    Resolve(String),

    /// TCP connect to the server failed.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailure {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Writing a request to the socket failed (including partial writes).
    #[error("failed to write request: {0}")]
    WriteFailure(#[source] std::io::Error),

    /// Failed to parse an RTSP response message (RFC 2326 §7).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The connection closed or failed while the request was outstanding.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// No response arrived before the request's deadline.
    #[error("no response to CSeq {cseq} before the deadline")]
    Timeout { cseq: u32 },

    /// [`RtspClient::close`](crate::RtspClient::close) was called.
    #[error("client closed")]
    Closed,

    /// The HTTP tunnel could not be established.
    #[error("HTTP tunneling failed: {0}")]
    TunnelFailure(String),
}

/// Specific kind of RTSP response parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The start line was empty.
    EmptyStatusLine,
    /// The start line was neither `RTSP/<ver> <code> <reason>` nor a request line.
    InvalidStatusLine,
    /// The status code was not a three-digit number.
    InvalidStatusCode,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// `Content-Length` was present but not a non-negative integer.
    InvalidContentLength,
    /// The header block grew past the response buffer without terminating.
    HeaderTooLarge,
    /// `Content-Length` exceeds the body cap. The stream cannot be resynchronized.
    BodyTooLarge,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyStatusLine => write!(f, "empty status line"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidStatusCode => write!(f, "invalid status code"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidContentLength => write!(f, "invalid Content-Length"),
            Self::HeaderTooLarge => write!(f, "header block exceeds response buffer"),
            Self::BodyTooLarge => write!(f, "Content-Length exceeds body limit"),
        }
    }
}

impl From<ParseErrorKind> for RtspError {
    fn from(kind: ParseErrorKind) -> Self {
        RtspError::Parse { kind }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
