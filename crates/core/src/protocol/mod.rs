//! RTSP protocol implementation, client side (RFC 2326).
//!
//! This module handles the text-based RTSP signaling protocol: building
//! requests, reassembling responses from the byte stream, and parsing them.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! DESCRIBE rtsp://server/stream RTSP/1.0\r\n
//! CSeq: 2\r\n
//! User-Agent: rtsp-client-rs/0.1.0\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! The server answers with the same `CSeq`, which is how a response is
//! matched to its request; responses may arrive in any order.
//!
//! ## Supported methods
//!
//! | Method | RFC section | Extra headers sent |
//! |--------|-------------|--------------------|
//! | OPTIONS | §10.1 | `Content-Type: application/sdp` |
//! | DESCRIBE | §10.2 | `Accept: application/sdp` |
//! | ANNOUNCE | §10.3 | `Content-Type: application/sdp` + SDP body |
//! | SETUP | §10.4 | `Transport` |
//! | PLAY | §10.5 | `Range`, `Scale` |
//! | PAUSE | §10.6 | |
//! | RECORD | §10.11 | |
//! | TEARDOWN | §10.7 | |
//! | GET_PARAMETER | §10.8 | `Content-Type: text/parameters` with a body |
//! | SET_PARAMETER | §10.9 | `Content-Type: text/parameters` |

pub mod framing;
pub mod request;
pub mod response;

pub use framing::{IncomingRequest, Message, ResponseFramer};
pub use request::{CommandParams, Method, PlayRange, RequestRecord};
pub use response::{RtspResponse, StatusLine};
