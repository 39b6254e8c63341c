//! RTSP/1.0 client control channel.
//!
//! Issues RTSP commands to a server over one TCP connection and delivers
//! each reply, correlated by `CSeq`, to the handler supplied with the
//! command. Media transport is out of scope; the client only negotiates it.
//!
//! ```no_run
//! use rtsp_client::{ClientConfig, RtspClient};
//!
//! let client = RtspClient::new("rtsp://camera.local/live", ClientConfig::default());
//! client.send_describe(|_client, reply| {
//!     println!("{} {}", reply.code, reply.text);
//! });
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod transport;
pub mod url;

pub use auth::{Authenticator, BasicAuthenticator};
pub use client::{ClientConfig, Command, QueueDepths, Reply, ResponseHandler, RtspClient};
pub use error::{ParseErrorKind, Result, RtspError};
pub use protocol::{Method, PlayRange, RtspResponse};
pub use session::{ControlPath, ServerSession, SessionState, TransportSpec};
pub use transport::{Connector, TcpConnector};
pub use url::ParsedUrl;
