//! Client-side view of the server's RTSP session (RFC 2326 §3, §12.37).
//!
//! The server assigns a session ID in its reply to the first SETUP. The
//! client echoes it in the `Session` header of every later request that
//! acts on the session, and tracks the playback state the server has
//! confirmed:
//!
//! ```text
//! SETUP 2xx     -> Ready
//! PLAY 2xx      -> Playing
//! PAUSE 2xx     -> Paused   (from Playing)
//! PLAY 2xx      -> Playing  (from Paused)
//! TEARDOWN 2xx  -> Init     (session ID forgotten)
//! ```
//!
//! The session description itself (SDP, tracks) is not modelled here.
//! Callers hand in anything implementing [`ControlPath`] to address a
//! session or one of its subsessions.

pub mod transport;

use crate::protocol::{Method, RtspResponse};
pub use transport::{TransportHeader, TransportSpec};

/// Anything addressable by an RTSP control path (`a=control:` in SDP).
///
/// The path is either a complete URL or relative to the enclosing
/// session's URL (or the base URL). `*` and the empty string mean "the
/// enclosing URL itself".
pub trait ControlPath: Send + Sync {
    fn control_path(&self) -> &str;
}

impl ControlPath for String {
    fn control_path(&self) -> &str {
        self
    }
}

impl ControlPath for &'static str {
    fn control_path(&self) -> &str {
        self
    }
}

/// Playback state confirmed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session established (or torn down).
    Init,
    /// SETUP acknowledged; not yet playing.
    Ready,
    Playing,
    Paused,
}

/// Session ID, timeout, scale and state as last reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSession {
    pub id: Option<String>,
    /// Keepalive timeout from `Session: <id>;timeout=<secs>`.
    pub timeout_secs: Option<u64>,
    pub state: SessionState,
    /// Playback scale confirmed by the last PLAY reply.
    pub scale: f32,
}

impl Default for ServerSession {
    fn default() -> Self {
        Self {
            id: None,
            timeout_secs: None,
            state: SessionState::Init,
            scale: 1.0,
        }
    }
}

impl ServerSession {
    /// Fold a reply to `method` into the tracked state.
    ///
    /// A `Session` header is taken from any reply; state transitions and
    /// scale follow only 2xx replies.
    pub fn observe(&mut self, method: Method, response: &RtspResponse) {
        if let Some(value) = response.get_header("Session") {
            let (id, timeout) = parse_session_header(value);
            if self.id.as_deref() != Some(id) {
                tracing::debug!(session_id = id, timeout_secs = ?timeout, "server session assigned");
            }
            self.id = Some(id.to_string());
            if timeout.is_some() {
                self.timeout_secs = timeout;
            }
        }

        if !response.is_success() {
            return;
        }

        let next = match method {
            Method::Setup if self.state == SessionState::Init => SessionState::Ready,
            Method::Play => {
                if let Some(scale) = response.get_header("Scale").and_then(|s| s.parse().ok()) {
                    self.scale = scale;
                }
                SessionState::Playing
            }
            Method::Pause => SessionState::Paused,
            Method::Teardown => {
                *self = ServerSession::default();
                SessionState::Init
            }
            _ => self.state,
        };
        if next != self.state {
            tracing::debug!(old_state = ?self.state, new_state = ?next, "session state transition");
            self.state = next;
        }
    }
}

/// Split a `Session` header value into its ID and optional timeout.
///
/// `"0000000000000001;timeout=60"` -> `("0000000000000001", Some(60))`
pub fn parse_session_header(value: &str) -> (&str, Option<u64>) {
    let mut parts = value.split(';');
    let id = parts.next().unwrap_or(value).trim();
    let timeout = parts
        .filter_map(|p| p.trim().strip_prefix("timeout="))
        .find_map(|t| t.trim().parse().ok());
    (id, timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::response::StatusLine;

    fn reply(status: &str, headers: &[(&str, &str)]) -> RtspResponse {
        RtspResponse::new(
            StatusLine::parse(status).unwrap(),
            headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            Vec::new(),
        )
    }

    #[test]
    fn session_header_with_timeout() {
        assert_eq!(parse_session_header("ABC123;timeout=60"), ("ABC123", Some(60)));
        assert_eq!(parse_session_header(" ABC123 "), ("ABC123", None));
        assert_eq!(parse_session_header("X; timeout=abc"), ("X", None));
    }

    #[test]
    fn lifecycle_follows_successful_replies() {
        let mut session = ServerSession::default();
        session.observe(
            Method::Setup,
            &reply("RTSP/1.0 200 OK", &[("Session", "F00D;timeout=30")]),
        );
        assert_eq!(session.id.as_deref(), Some("F00D"));
        assert_eq!(session.timeout_secs, Some(30));
        assert_eq!(session.state, SessionState::Ready);

        session.observe(Method::Play, &reply("RTSP/1.0 200 OK", &[("Scale", "2.0")]));
        assert_eq!(session.state, SessionState::Playing);
        assert_eq!(session.scale, 2.0);

        session.observe(Method::Pause, &reply("RTSP/1.0 200 OK", &[]));
        assert_eq!(session.state, SessionState::Paused);

        session.observe(Method::Play, &reply("RTSP/1.0 454 Session Not Found", &[]));
        assert_eq!(session.state, SessionState::Paused);

        session.observe(Method::Teardown, &reply("RTSP/1.0 200 OK", &[]));
        assert_eq!(session, ServerSession::default());
    }

    #[test]
    fn session_header_is_taken_from_an_error_reply() {
        let mut session = ServerSession::default();
        session.observe(
            Method::Setup,
            &reply("RTSP/1.0 461 Unsupported Transport", &[("Session", "BEEF")]),
        );
        assert_eq!(session.id.as_deref(), Some("BEEF"));
        assert_eq!(session.state, SessionState::Init);
    }

    #[test]
    fn second_setup_keeps_state() {
        let mut session = ServerSession::default();
        session.observe(Method::Setup, &reply("RTSP/1.0 200 OK", &[("Session", "A")]));
        session.observe(Method::Play, &reply("RTSP/1.0 200 OK", &[]));
        session.observe(Method::Setup, &reply("RTSP/1.0 200 OK", &[("Session", "A")]));
        assert_eq!(session.state, SessionState::Playing);
    }
}
