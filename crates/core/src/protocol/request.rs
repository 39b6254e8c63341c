use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::client::{Reply, ResponseHandler, RtspClient};
use crate::session::ControlPath;
use crate::session::transport::TransportSpec;
use crate::url;

/// Protocol version sent on every request line.
pub const RTSP_VERSION: &str = "RTSP/1.0";

/// RTSP methods the client can issue (RFC 2326 §10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Options,
    Describe,
    Announce,
    Setup,
    Play,
    Pause,
    Record,
    Teardown,
    GetParameter,
    SetParameter,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::Describe => "DESCRIBE",
            Method::Announce => "ANNOUNCE",
            Method::Setup => "SETUP",
            Method::Play => "PLAY",
            Method::Pause => "PAUSE",
            Method::Record => "RECORD",
            Method::Teardown => "TEARDOWN",
            Method::GetParameter => "GET_PARAMETER",
            Method::SetParameter => "SET_PARAMETER",
        }
    }

    /// Whether requests of this method carry the `Session` header once the
    /// server has assigned one (RFC 2326 §12.37).
    pub fn carries_session(&self) -> bool {
        !matches!(self, Method::Options | Method::Describe | Method::Announce)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested playback range for PLAY (RFC 2326 §12.29).
#[derive(Debug, Clone, PartialEq)]
pub enum PlayRange {
    /// Resume from a PAUSE: no `Range` header at all.
    Resume,
    /// Relative Normal Play Time in seconds; `end: None` plays to the end.
    Npt { start: f64, end: Option<f64> },
    /// Absolute UTC clock time, e.g. `19961108T142300Z`.
    Clock { start: String, end: Option<String> },
}

impl PlayRange {
    /// `Range:` header line (with CRLF), or empty for [`PlayRange::Resume`].
    pub fn header(&self) -> String {
        match self {
            PlayRange::Resume => String::new(),
            PlayRange::Npt { start, end: None } => format!("Range: npt={start:.3}-\r\n"),
            PlayRange::Npt {
                start,
                end: Some(end),
            } => format!("Range: npt={start:.3}-{end:.3}\r\n"),
            PlayRange::Clock { start, end: None } => format!("Range: clock={start}-\r\n"),
            PlayRange::Clock {
                start,
                end: Some(end),
            } => format!("Range: clock={start}-{end}\r\n"),
        }
    }
}

/// Verb-specific inputs captured when the command is issued.
#[derive(Debug, Clone, Default)]
pub struct CommandParams {
    pub range: Option<PlayRange>,
    pub scale: Option<f32>,
    pub transport: Option<TransportSpec>,
}

/// One outstanding command.
///
/// Immutable once created; it is consumed by [`complete`](Self::complete)
/// when its response arrives or it is abandoned.
pub struct RequestRecord {
    cseq: u32,
    method: Method,
    body: String,
    session: Option<Arc<dyn ControlPath>>,
    subsession: Option<Arc<dyn ControlPath>>,
    params: CommandParams,
    issued_at: Instant,
    handler: ResponseHandler,
}

impl fmt::Debug for RequestRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestRecord")
            .field("cseq", &self.cseq)
            .field("method", &self.method)
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

impl RequestRecord {
    pub fn new(cseq: u32, method: Method, handler: ResponseHandler) -> Self {
        RequestRecord {
            cseq,
            method,
            body: String::new(),
            session: None,
            subsession: None,
            params: CommandParams::default(),
            issued_at: Instant::now(),
            handler,
        }
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = body;
        self
    }

    pub fn with_session(mut self, session: Option<Arc<dyn ControlPath>>) -> Self {
        self.session = session;
        self
    }

    pub fn with_subsession(mut self, subsession: Option<Arc<dyn ControlPath>>) -> Self {
        self.subsession = subsession;
        self
    }

    pub fn with_params(mut self, params: CommandParams) -> Self {
        self.params = params;
        self
    }

    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn params(&self) -> &CommandParams {
        &self.params
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    /// Consume the record, invoking its handler exactly once.
    pub fn complete(self, client: &RtspClient, reply: Reply) {
        (self.handler)(client, reply)
    }

    /// Carry the handler and inputs over to a fresh CSeq (used to reissue a
    /// command after a redirect).
    pub fn reissue(self, cseq: u32) -> Self {
        RequestRecord {
            cseq,
            issued_at: Instant::now(),
            ..self
        }
    }

    /// Target URL for the request line.
    ///
    /// SETUP addresses the subsession; the playback verbs address the
    /// subsession when given, else the session; everything else (and any
    /// verb without an entity) addresses the base URL.
    pub fn url(&self, base_url: &str) -> String {
        match (self.method, &self.subsession, &self.session) {
            (Method::Options | Method::Describe | Method::Announce, _, _) => base_url.to_string(),
            (_, Some(sub), session) => {
                subsession_url(base_url, session.as_deref(), sub.control_path())
            }
            (_, None, Some(session)) => session_url(base_url, session.control_path()),
            (_, None, None) => base_url.to_string(),
        }
    }
}

/// URL of a whole session: its control path when that is usable, else the base URL.
pub fn session_url(base_url: &str, control_path: &str) -> String {
    if control_path.is_empty() || control_path == "*" {
        base_url.to_string()
    } else if url::is_absolute(control_path) {
        control_path.to_string()
    } else {
        url::join(base_url, control_path)
    }
}

/// URL of a subsession (RFC 2326 §C.1.1).
///
/// Absolute control paths are used as-is. Relative ones are resolved
/// against the session's control URL when a session is known, otherwise
/// against the base URL.
pub fn subsession_url(base_url: &str, session: Option<&dyn ControlPath>, control_path: &str) -> String {
    if url::is_absolute(control_path) {
        return control_path.to_string();
    }
    let prefix = match session {
        Some(session) => session_url(base_url, session.control_path()),
        None => base_url.to_string(),
    };
    if control_path.is_empty() || control_path == "*" {
        prefix
    } else {
        url::join(&prefix, control_path)
    }
}

/// Client-side state folded into a request at send time.
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    pub url: &'a str,
    /// `Authorization` header value, if an authenticator produced one.
    pub authorization: Option<String>,
    /// Complete `User-Agent: ...\r\n` line.
    pub user_agent_header: &'a str,
    pub session_id: Option<&'a str>,
    /// Scale most recently confirmed by the server.
    pub current_scale: f32,
}

type HeaderFn = fn(&RequestRecord, &RequestContext<'_>, &mut String);

/// Verb-specific header builders. Verbs without an entry add nothing.
const VERB_HEADERS: &[(Method, HeaderFn)] = &[
    (Method::Options, sdp_content_type),
    (Method::Announce, sdp_content_type),
    (Method::Describe, accept_sdp),
    (Method::Setup, transport_header),
    (Method::Play, play_headers),
    (Method::GetParameter, text_parameters),
    (Method::SetParameter, text_parameters),
];

fn sdp_content_type(_: &RequestRecord, _: &RequestContext<'_>, out: &mut String) {
    out.push_str("Content-Type: application/sdp\r\n");
}

fn accept_sdp(_: &RequestRecord, _: &RequestContext<'_>, out: &mut String) {
    out.push_str("Accept: application/sdp\r\n");
}

fn transport_header(record: &RequestRecord, _: &RequestContext<'_>, out: &mut String) {
    if let Some(transport) = &record.params.transport {
        out.push_str(&format!("Transport: {}\r\n", transport.header_value()));
    }
}

fn play_headers(record: &RequestRecord, ctx: &RequestContext<'_>, out: &mut String) {
    if let Some(range) = &record.params.range {
        out.push_str(&range.header());
    }
    let scale = record.params.scale.unwrap_or(1.0);
    if scale != 1.0 || ctx.current_scale != 1.0 {
        out.push_str(&format!("Scale: {scale}\r\n"));
    }
}

fn text_parameters(record: &RequestRecord, _: &RequestContext<'_>, out: &mut String) {
    if !record.body.is_empty() {
        out.push_str("Content-Type: text/parameters\r\n");
    }
}

/// Serialize a request to the RTSP text wire format:
///
/// ```text
/// <VERB> <URL> RTSP/1.0\r\n
/// CSeq: <n>\r\n
/// [Authorization: ...\r\n]
/// User-Agent: ...\r\n
/// [verb-specific headers][Session: ...\r\n]
/// [Content-Length: <len>\r\n]
/// \r\n
/// [body]
/// ```
pub fn serialize(record: &RequestRecord, ctx: &RequestContext<'_>) -> String {
    let mut request = format!("{} {} {}\r\n", record.method, ctx.url, RTSP_VERSION);
    request.push_str(&format!("CSeq: {}\r\n", record.cseq));

    if let Some(auth) = &ctx.authorization {
        request.push_str(&format!("Authorization: {auth}\r\n"));
    }
    request.push_str(ctx.user_agent_header);

    if let Some((_, build)) = VERB_HEADERS.iter().find(|(m, _)| *m == record.method) {
        build(record, ctx, &mut request);
    }
    if record.method.carries_session()
        && let Some(id) = ctx.session_id
    {
        request.push_str(&format!("Session: {id}\r\n"));
    }

    if !record.body.is_empty() {
        request.push_str(&format!("Content-Length: {}\r\n", record.body.len()));
    }
    request.push_str("\r\n");
    request.push_str(&record.body);
    request
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cseq: u32, method: Method) -> RequestRecord {
        RequestRecord::new(cseq, method, Box::new(|_: &RtspClient, _: Reply| {}))
    }

    fn ctx(url: &str) -> RequestContext<'_> {
        RequestContext {
            url,
            authorization: None,
            user_agent_header: "User-Agent: test\r\n",
            session_id: None,
            current_scale: 1.0,
        }
    }

    #[test]
    fn options_request_layout() {
        let s = serialize(&record(2, Method::Options), &ctx("rtsp://h/s"));
        assert_eq!(
            s,
            "OPTIONS rtsp://h/s RTSP/1.0\r\nCSeq: 2\r\nUser-Agent: test\r\nContent-Type: application/sdp\r\n\r\n"
        );
    }

    #[test]
    fn describe_accepts_sdp() {
        let s = serialize(&record(3, Method::Describe), &ctx("rtsp://h/s"));
        assert!(s.starts_with("DESCRIBE rtsp://h/s RTSP/1.0\r\nCSeq: 3\r\n"));
        assert!(s.contains("Accept: application/sdp\r\n"));
        assert!(!s.contains("Content-Length"));
    }

    #[test]
    fn announce_body_gets_content_length() {
        let sdp = "v=0\r\ns=Stream\r\n";
        let rec = record(4, Method::Announce).with_body(sdp.to_string());
        let s = serialize(&rec, &ctx("rtsp://h/s"));
        assert!(s.contains("Content-Type: application/sdp\r\n"));
        assert!(s.contains(&format!("Content-Length: {}\r\n\r\n{}", sdp.len(), sdp)));
        assert!(s.ends_with(sdp));
    }

    #[test]
    fn authorization_precedes_user_agent() {
        let mut c = ctx("rtsp://h/s");
        c.authorization = Some("Basic dTpw".to_string());
        let s = serialize(&record(5, Method::Describe), &c);
        let auth = s.find("Authorization: Basic dTpw\r\n").unwrap();
        let agent = s.find("User-Agent: test\r\n").unwrap();
        assert!(auth < agent);
    }

    #[test]
    fn session_header_only_on_session_verbs() {
        let mut c = ctx("rtsp://h/s");
        c.session_id = Some("ABCD");
        assert!(serialize(&record(6, Method::Play), &c).contains("Session: ABCD\r\n"));
        assert!(serialize(&record(7, Method::Teardown), &c).contains("Session: ABCD\r\n"));
        assert!(!serialize(&record(8, Method::Describe), &c).contains("Session:"));
    }

    #[test]
    fn play_range_variants() {
        assert_eq!(PlayRange::Resume.header(), "");
        assert_eq!(
            PlayRange::Npt { start: 0.0, end: None }.header(),
            "Range: npt=0.000-\r\n"
        );
        assert_eq!(
            PlayRange::Npt {
                start: 1.5,
                end: Some(10.25)
            }
            .header(),
            "Range: npt=1.500-10.250\r\n"
        );
        assert_eq!(
            PlayRange::Clock {
                start: "19961108T142300Z".to_string(),
                end: None
            }
            .header(),
            "Range: clock=19961108T142300Z-\r\n"
        );
    }

    #[test]
    fn play_scale_header() {
        let rec = record(9, Method::Play).with_params(CommandParams {
            range: Some(PlayRange::Resume),
            scale: Some(2.0),
            ..Default::default()
        });
        let s = serialize(&rec, &ctx("rtsp://h/s"));
        assert!(s.contains("Scale: 2\r\n"));
        assert!(!s.contains("Range:"));

        let normal = record(10, Method::Play);
        assert!(!serialize(&normal, &ctx("rtsp://h/s")).contains("Scale:"));

        let mut fast = ctx("rtsp://h/s");
        fast.current_scale = 4.0;
        assert!(serialize(&normal, &fast).contains("Scale: 1\r\n"));
    }

    #[test]
    fn get_parameter_body_is_text_parameters() {
        let rec = record(11, Method::GetParameter).with_body("position\r\n".to_string());
        let s = serialize(&rec, &ctx("rtsp://h/s"));
        assert!(s.contains("Content-Type: text/parameters\r\nContent-Length: 10\r\n\r\nposition\r\n"));
    }

    #[test]
    fn setup_url_resolution() {
        let base = "rtsp://cam/live";
        let session: Arc<dyn ControlPath> = Arc::new("rtsp://cam/live/".to_string());
        let relative: Arc<dyn ControlPath> = Arc::new("trackID=1".to_string());
        let absolute: Arc<dyn ControlPath> = Arc::new("rtsp://other/track".to_string());
        let star: Arc<dyn ControlPath> = Arc::new("*".to_string());

        let rec = record(12, Method::Setup).with_subsession(Some(relative.clone()));
        assert_eq!(rec.url(base), "rtsp://cam/live/trackID=1");

        let rec = record(13, Method::Setup)
            .with_session(Some(session))
            .with_subsession(Some(relative));
        assert_eq!(rec.url(base), "rtsp://cam/live/trackID=1");

        let rec = record(14, Method::Setup)
            .with_session(Some(star.clone()))
            .with_subsession(Some(absolute));
        assert_eq!(rec.url(base), "rtsp://other/track");

        let rec = record(15, Method::Play).with_session(Some(star));
        assert_eq!(rec.url(base), base);
    }

    #[test]
    fn reissue_keeps_method_and_body() {
        let rec = record(16, Method::Announce).with_body("v=0\r\n".to_string());
        let again = rec.reissue(17);
        assert_eq!(again.cseq(), 17);
        assert_eq!(again.method(), Method::Announce);
        assert_eq!(again.body(), "v=0\r\n");
    }
}
