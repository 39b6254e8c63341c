//! Network transport for the RTSP control channel.
//!
//! One TCP connection per client carries every request and response.
//! [`tcp`] owns that connection's lifecycle:
//!
//! - **Connect**: performed on a short-lived thread so that commands
//!   issued meanwhile can queue behind it in order.
//! - **Read**: a reader thread per connection frames responses out of the
//!   byte stream and hands them to the client for correlation.
//! - **Write**: a writer thread per connection drains queued requests in
//!   order, so callers never wait on the socket.
//! - **Close**: dropping the connection handle shuts the socket down
//!   exactly once; both threads then see the closed socket and exit.

pub mod tcp;

pub use tcp::{Connector, TcpConnector};
