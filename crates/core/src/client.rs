use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::auth::{Authenticator, BasicAuthenticator};
use crate::error::{Result, RtspError};
use crate::protocol::framing::DEFAULT_MAX_BODY_LEN;
use crate::protocol::request::{self, RequestContext};
use crate::protocol::{CommandParams, IncomingRequest, Message, Method, PlayRange, RequestRecord, RtspResponse};
use crate::queue::RequestQueue;
use crate::session::{ControlPath, ServerSession, TransportSpec};
use crate::transport::tcp::{self, Connection, ConnectionOptions, Outgoing};
use crate::transport::{Connector, TcpConnector};
use crate::url::{DEFAULT_MAX_URL_LEN, ParsedUrl};

/// Name and version sent in every `User-Agent` header.
pub const LIBRARY_AGENT: &str = concat!("rtsp-client-rs/", env!("CARGO_PKG_VERSION"));

/// Default size of the per-connection response read buffer.
pub const DEFAULT_RESPONSE_BUFFER_SIZE: usize = 20_000;

/// Redirects followed in a row before the command is failed.
const MAX_REDIRECTS: u32 = 5;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Application name prepended to the library agent in `User-Agent`.
    pub app_name: Option<String>,
    /// Longest URL accepted when connecting.
    pub max_url_len: usize,
    /// Read buffer size; also caps the size of a response header block.
    pub response_buffer_size: usize,
    /// Largest response body accepted. A bigger `Content-Length` drops
    /// the connection.
    pub max_body_len: usize,
    pub connect_timeout: Duration,
    /// A write stalled longer than this fails and drops the connection.
    pub write_timeout: Option<Duration>,
    /// Deadline for each request's response. `None` waits forever.
    pub response_timeout: Option<Duration>,
    /// HTTP tunnel port. When non-zero, requests wait for
    /// [`RtspClient::tunnel_established`] before they are written.
    pub tunnel_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app_name: None,
            max_url_len: DEFAULT_MAX_URL_LEN,
            response_buffer_size: DEFAULT_RESPONSE_BUFFER_SIZE,
            max_body_len: DEFAULT_MAX_BODY_LEN,
            connect_timeout: Duration::from_secs(10),
            write_timeout: Some(Duration::from_secs(10)),
            response_timeout: Some(Duration::from_secs(30)),
            tunnel_port: 0,
        }
    }
}

/// Outcome delivered to a command's handler.
///
/// `code` is the RTSP status code, or 0 when the command failed locally
/// (connect failure, write failure, timeout, close); `text` is then the
/// error description.
#[derive(Debug, Clone)]
pub struct Reply {
    pub code: u16,
    pub text: String,
    pub response: Option<RtspResponse>,
}

impl Reply {
    pub(crate) fn from_response(response: RtspResponse) -> Self {
        Self {
            code: response.status_code,
            text: response.reason.clone(),
            response: Some(response),
        }
    }

    pub(crate) fn failed(err: &RtspError) -> Self {
        Self {
            code: 0,
            text: err.to_string(),
            response: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Response body as text (the SDP for DESCRIBE).
    pub fn body_text(&self) -> Option<String> {
        self.response.as_ref().map(RtspResponse::body_text)
    }
}

/// Completion callback, invoked exactly once per command.
pub type ResponseHandler = Box<dyn FnOnce(&RtspClient, Reply) + Send + 'static>;

/// A command to issue: the method plus whatever the method needs.
///
/// The `send_*` helpers on [`RtspClient`] build these; use
/// [`RtspClient::send`] directly for anything they don't cover.
pub struct Command {
    method: Method,
    body: String,
    session: Option<Arc<dyn ControlPath>>,
    subsession: Option<Arc<dyn ControlPath>>,
    params: CommandParams,
}

impl Command {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            body: String::new(),
            session: None,
            subsession: None,
            params: CommandParams::default(),
        }
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn session(mut self, session: Option<Arc<dyn ControlPath>>) -> Self {
        self.session = session;
        self
    }

    pub fn subsession(mut self, subsession: Option<Arc<dyn ControlPath>>) -> Self {
        self.subsession = subsession;
        self
    }

    pub fn params(mut self, params: CommandParams) -> Self {
        self.params = params;
        self
    }

    fn into_record(self, cseq: u32, handler: ResponseHandler) -> RequestRecord {
        RequestRecord::new(cseq, self.method, handler)
            .with_body(self.body)
            .with_session(self.session)
            .with_subsession(self.subsession)
            .with_params(self.params)
    }
}

/// Number of commands in each holding queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepths {
    pub awaiting_connection: usize,
    pub awaiting_response: usize,
    pub awaiting_tunneling: usize,
}

impl QueueDepths {
    pub fn total(&self) -> usize {
        self.awaiting_connection + self.awaiting_response + self.awaiting_tunneling
    }
}

/// RTSP client control channel.
///
/// Issues commands over one TCP connection to a server and delivers each
/// reply to the handler given with the command. Commands may be issued
/// before the connection exists; they are written in issue order once it
/// does. Handlers run on the reader thread (or, for failures detected
/// while issuing, on the calling thread) with no internal lock held, so
/// they may issue further commands.
///
/// Cloning yields another handle to the same client. The connection is
/// shut down by [`close`](Self::close) or when the last handle is dropped.
#[derive(Clone)]
pub struct RtspClient {
    inner: Arc<Inner>,
}

/// Non-owning handle held by the reader and writer threads.
#[derive(Clone)]
pub(crate) struct WeakClient(Weak<Inner>);

impl WeakClient {
    pub(crate) fn upgrade(&self) -> Option<RtspClient> {
        self.0.upgrade().map(|inner| RtspClient { inner })
    }
}

struct Inner {
    config: ClientConfig,
    connector: Box<dyn Connector>,
    state: Mutex<ClientState>,
}

struct ClientState {
    base_url: String,
    cseq: u32,
    user_agent_header: String,
    authenticator: Option<Arc<dyn Authenticator>>,
    connection: Option<Connection>,
    /// Bumped on every connect attempt and every disconnect, so stale
    /// connect results and readers can be recognised.
    epoch: u64,
    tunnel_ready: bool,
    redirects: u32,
    session: ServerSession,
    awaiting_connection: RequestQueue,
    awaiting_response: RequestQueue,
    awaiting_tunneling: RequestQueue,
}

/// Handler invocations collected under the lock, run after it is released.
type Completions = Vec<(RequestRecord, Reply)>;

fn user_agent_header(app_name: Option<&str>) -> String {
    match app_name {
        Some(name) if !name.is_empty() => format!("User-Agent: {name} ({LIBRARY_AGENT})\r\n"),
        _ => format!("User-Agent: {LIBRARY_AGENT}\r\n"),
    }
}

fn fail_all(records: Vec<RequestRecord>, err: &RtspError, completions: &mut Completions) {
    for record in records {
        completions.push((record, Reply::failed(err)));
    }
}

impl fmt::Debug for RtspClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RtspClient")
            .field("base_url", &state.base_url)
            .field("cseq", &state.cseq)
            .field("connected", &state.connection.is_some())
            .finish_non_exhaustive()
    }
}

impl RtspClient {
    /// Create a client for `url`. No connection is made until the first
    /// command is issued.
    ///
    /// Credentials embedded in the URL install a Basic authenticator.
    pub fn new(url: &str, config: ClientConfig) -> Self {
        Self::with_connector(url, config, TcpConnector)
    }

    pub fn with_connector(url: &str, config: ClientConfig, connector: impl Connector + 'static) -> Self {
        let authenticator = ParsedUrl::parse_with_limit(url, config.max_url_len)
            .ok()
            .and_then(|parsed| parsed.credentials)
            .map(|credentials| Arc::new(BasicAuthenticator::new(&credentials)) as Arc<dyn Authenticator>);

        let state = ClientState {
            base_url: url.to_string(),
            cseq: 1,
            user_agent_header: user_agent_header(config.app_name.as_deref()),
            authenticator,
            connection: None,
            epoch: 0,
            tunnel_ready: false,
            redirects: 0,
            session: ServerSession::default(),
            awaiting_connection: RequestQueue::new(),
            awaiting_response: RequestQueue::new(),
            awaiting_tunneling: RequestQueue::new(),
        };

        Self {
            inner: Arc::new(Inner {
                config,
                connector: Box::new(connector),
                state: Mutex::new(state),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub(crate) fn connector(&self) -> &dyn Connector {
        self.inner.connector.as_ref()
    }

    /// Current base URL. Updated by DESCRIBE's `Content-Base` and by redirects.
    pub fn base_url(&self) -> String {
        self.inner.state.lock().base_url.clone()
    }

    /// Replace the base URL used for later commands.
    pub fn set_base_url(&self, url: &str) {
        self.inner.state.lock().base_url = url.to_string();
    }

    /// Replace the `User-Agent` application name.
    pub fn set_user_agent(&self, app_name: &str) {
        self.inner.state.lock().user_agent_header = user_agent_header(Some(app_name));
    }

    /// Install (or remove) the authenticator consulted for every request.
    pub fn set_authenticator(&self, authenticator: Option<Arc<dyn Authenticator>>) {
        self.inner.state.lock().authenticator = authenticator;
    }

    /// Server session as last reported by the server.
    pub fn session(&self) -> ServerSession {
        self.inner.state.lock().session.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connection.is_some()
    }

    pub fn queue_depths(&self) -> QueueDepths {
        let state = self.inner.state.lock();
        QueueDepths {
            awaiting_connection: state.awaiting_connection.len(),
            awaiting_response: state.awaiting_response.len(),
            awaiting_tunneling: state.awaiting_tunneling.len(),
        }
    }

    /// Issue a command.
    ///
    /// Returns the CSeq assigned to it, or 0 if it failed immediately (bad
    /// URL, unresolvable host); the handler has then already been called
    /// with code 0. Otherwise the handler is called exactly once, later.
    pub fn send<F>(&self, command: Command, handler: F) -> u32
    where
        F: FnOnce(&RtspClient, Reply) + Send + 'static,
    {
        let mut completions = Completions::new();
        let result = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            state.cseq += 1;
            let cseq = state.cseq;
            let record = command.into_record(cseq, Box::new(handler));
            tracing::debug!(cseq, method = %record.method(), "command issued");

            if !state.awaiting_connection.is_empty() {
                // A connect is in flight; queue behind the commands already waiting.
                state.awaiting_connection.enqueue(record);
                cseq
            } else if state.connection.is_none() {
                match self.start_connect(state) {
                    Ok(()) => {
                        state.awaiting_connection.enqueue(record);
                        cseq
                    }
                    Err(err) => {
                        tracing::warn!(cseq, error = %err, "command failed before connecting");
                        completions.push((record, Reply::failed(&err)));
                        0
                    }
                }
            } else {
                self.dispatch(state, record, &mut completions);
                cseq
            }
        };
        self.run_completions(completions);
        result
    }

    pub fn send_options<F>(&self, handler: F) -> u32
    where
        F: FnOnce(&RtspClient, Reply) + Send + 'static,
    {
        self.send(Command::new(Method::Options), handler)
    }

    /// DESCRIBE the base URL. A successful reply's `Content-Base` (or
    /// `Content-Location`) becomes the new base URL.
    pub fn send_describe<F>(&self, handler: F) -> u32
    where
        F: FnOnce(&RtspClient, Reply) + Send + 'static,
    {
        self.send(Command::new(Method::Describe), handler)
    }

    /// ANNOUNCE a session description to the server.
    pub fn send_announce<F>(&self, sdp: impl Into<String>, handler: F) -> u32
    where
        F: FnOnce(&RtspClient, Reply) + Send + 'static,
    {
        self.send(Command::new(Method::Announce).body(sdp), handler)
    }

    pub fn send_setup<F>(
        &self,
        session: Option<Arc<dyn ControlPath>>,
        subsession: Arc<dyn ControlPath>,
        transport: TransportSpec,
        handler: F,
    ) -> u32
    where
        F: FnOnce(&RtspClient, Reply) + Send + 'static,
    {
        let command = Command::new(Method::Setup)
            .session(session)
            .subsession(Some(subsession))
            .params(CommandParams {
                transport: Some(transport),
                ..Default::default()
            });
        self.send(command, handler)
    }

    /// PLAY the session (or one subsession) over `range` at `scale`.
    pub fn send_play<F>(
        &self,
        session: Option<Arc<dyn ControlPath>>,
        subsession: Option<Arc<dyn ControlPath>>,
        range: PlayRange,
        scale: f32,
        handler: F,
    ) -> u32
    where
        F: FnOnce(&RtspClient, Reply) + Send + 'static,
    {
        let command = Command::new(Method::Play)
            .session(session)
            .subsession(subsession)
            .params(CommandParams {
                range: Some(range),
                scale: Some(scale),
                ..Default::default()
            });
        self.send(command, handler)
    }

    pub fn send_pause<F>(
        &self,
        session: Option<Arc<dyn ControlPath>>,
        subsession: Option<Arc<dyn ControlPath>>,
        handler: F,
    ) -> u32
    where
        F: FnOnce(&RtspClient, Reply) + Send + 'static,
    {
        let command = Command::new(Method::Pause).session(session).subsession(subsession);
        self.send(command, handler)
    }

    pub fn send_record<F>(
        &self,
        session: Option<Arc<dyn ControlPath>>,
        subsession: Option<Arc<dyn ControlPath>>,
        handler: F,
    ) -> u32
    where
        F: FnOnce(&RtspClient, Reply) + Send + 'static,
    {
        let command = Command::new(Method::Record).session(session).subsession(subsession);
        self.send(command, handler)
    }

    pub fn send_teardown<F>(
        &self,
        session: Option<Arc<dyn ControlPath>>,
        subsession: Option<Arc<dyn ControlPath>>,
        handler: F,
    ) -> u32
    where
        F: FnOnce(&RtspClient, Reply) + Send + 'static,
    {
        let command = Command::new(Method::Teardown).session(session).subsession(subsession);
        self.send(command, handler)
    }

    /// GET_PARAMETER `name`; an empty name sends a bodiless keepalive.
    pub fn send_get_parameter<F>(&self, session: Option<Arc<dyn ControlPath>>, name: &str, handler: F) -> u32
    where
        F: FnOnce(&RtspClient, Reply) + Send + 'static,
    {
        let body = if name.is_empty() {
            String::new()
        } else {
            format!("{name}\r\n")
        };
        self.send(Command::new(Method::GetParameter).session(session).body(body), handler)
    }

    pub fn send_set_parameter<F>(
        &self,
        session: Option<Arc<dyn ControlPath>>,
        name: &str,
        value: &str,
        handler: F,
    ) -> u32
    where
        F: FnOnce(&RtspClient, Reply) + Send + 'static,
    {
        let body = format!("{name}: {value}\r\n");
        self.send(Command::new(Method::SetParameter).session(session).body(body), handler)
    }

    /// The HTTP tunnel is up: write every command that was waiting for it.
    pub fn tunnel_established(&self) {
        let mut completions = Completions::new();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            state.tunnel_ready = true;
            tracing::info!(waiting = state.awaiting_tunneling.len(), "HTTP tunnel established");
            while let Some(record) = state.awaiting_tunneling.dequeue_head() {
                self.write(state, record, &mut completions);
            }
        }
        self.run_completions(completions);
    }

    /// The HTTP tunnel could not be set up: fail every command waiting for it.
    pub fn tunnel_failed(&self, reason: &str) {
        let mut completions = Completions::new();
        {
            let mut state = self.inner.state.lock();
            tracing::warn!(reason, "HTTP tunnel failed");
            let err = RtspError::TunnelFailure(reason.to_string());
            fail_all(state.awaiting_tunneling.drain_all(), &err, &mut completions);
        }
        self.run_completions(completions);
    }

    /// Shut the connection down and fail every outstanding command.
    ///
    /// Idempotent. An in-flight connect is abandoned. The client remains
    /// usable: a later command starts a new connection.
    pub fn close(&self) {
        let mut completions = Completions::new();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let err = RtspError::Closed;
            let pending = state.awaiting_connection.drain_all();
            self.reset_connection(state, &err, &mut completions);
            fail_all(pending, &err, &mut completions);
        }
        self.run_completions(completions);
    }

    /// Sweep the awaiting-response queue for requests past their deadline.
    pub(crate) fn expire_requests(&self) {
        let Some(timeout) = self.inner.config.response_timeout else {
            return;
        };
        let mut completions = Completions::new();
        {
            let mut state = self.inner.state.lock();
            for record in state
                .awaiting_response
                .remove_where(|r| r.issued_at().elapsed() >= timeout)
            {
                let err = RtspError::Timeout { cseq: record.cseq() };
                tracing::warn!(cseq = record.cseq(), method = %record.method(), "request timed out");
                completions.push((record, Reply::failed(&err)));
            }
        }
        self.run_completions(completions);
    }

    /// Dispatch one framed message from the connection `connection_id`.
    pub(crate) fn handle_message(&self, connection_id: u64, message: Message) {
        match message {
            Message::Response(response) => self.handle_response(connection_id, response),
            Message::Request(request) => self.reject_request(connection_id, request),
            Message::Interleaved { channel, len } => {
                tracing::trace!(channel, len, "skipping interleaved frame");
            }
        }
    }

    /// The reader for `connection_id` stopped.
    pub(crate) fn connection_closed(&self, connection_id: u64, reason: String) {
        let mut completions = Completions::new();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.connection.as_ref().map(|c| c.id) != Some(connection_id) {
                tracing::debug!(connection = connection_id, reason = %reason, "reader for old connection exited");
                return;
            }
            tracing::info!(connection = connection_id, reason = %reason, "connection lost");
            self.reset_connection(state, &RtspError::ConnectionLost(reason), &mut completions);
        }
        self.run_completions(completions);
    }

    /// Result of the connect started for `epoch`.
    pub(crate) fn connect_finished(&self, epoch: u64, addr: SocketAddr, result: io::Result<TcpStream>) {
        let mut completions = Completions::new();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.epoch != epoch || state.connection.is_some() {
                tracing::debug!(%addr, "discarding result of abandoned connect");
                return;
            }

            match result.and_then(|stream| self.install_connection(state, stream, epoch)) {
                Ok(()) => {
                    while let Some(record) = state.awaiting_connection.dequeue_head() {
                        self.dispatch(state, record, &mut completions);
                    }
                }
                Err(source) => {
                    let err = RtspError::ConnectFailure { addr, source };
                    tracing::warn!(error = %err, "connect failed");
                    state.epoch += 1;
                    fail_all(state.awaiting_connection.drain_all(), &err, &mut completions);
                }
            }
        }
        self.run_completions(completions);
    }

    fn install_connection(&self, state: &mut ClientState, stream: TcpStream, id: u64) -> io::Result<()> {
        let config = &self.inner.config;
        let connection = Connection::start(
            id,
            stream,
            WeakClient(Arc::downgrade(&self.inner)),
            ConnectionOptions {
                buffer_size: config.response_buffer_size,
                max_body_len: config.max_body_len,
                sweep_deadlines: config.response_timeout.is_some(),
                write_timeout: config.write_timeout,
            },
        )?;
        state.connection = Some(connection);
        state.tunnel_ready = false;
        Ok(())
    }

    /// Parse the base URL, resolve it and start connecting in the background.
    fn start_connect(&self, state: &mut ClientState) -> Result<()> {
        let config = &self.inner.config;
        let url = ParsedUrl::parse_with_limit(&state.base_url, config.max_url_len)?;
        let port = if config.tunnel_port != 0 {
            config.tunnel_port
        } else {
            url.port
        };
        let target = ParsedUrl { port, ..url };
        let addr = self
            .inner
            .connector
            .resolve(&target.address, target.port)
            .map_err(|e| RtspError::Resolve(format!("{}: {e}", target.authority())))?;

        state.epoch += 1;
        tcp::spawn_connect(self.clone(), addr, state.epoch, config.connect_timeout)?;
        tracing::debug!(%addr, url = %state.base_url, "connect started");
        Ok(())
    }

    /// Route a command on a live connection: hold it for the tunnel, or write it.
    fn dispatch(&self, state: &mut ClientState, record: RequestRecord, completions: &mut Completions) {
        if self.inner.config.tunnel_port != 0 && !state.tunnel_ready {
            tracing::debug!(cseq = record.cseq(), "waiting for HTTP tunnel");
            state.awaiting_tunneling.enqueue(record);
            return;
        }
        self.write(state, record, completions);
    }

    /// Serialize a command, hold it for its response and queue it for the
    /// writer thread. The socket write itself happens outside the lock.
    fn write(&self, state: &mut ClientState, record: RequestRecord, completions: &mut Completions) {
        if state.connection.is_none() {
            let err = RtspError::ConnectionLost("not connected".to_string());
            completions.push((record, Reply::failed(&err)));
            return;
        }

        let url = record.url(&state.base_url);
        let authorization = state
            .authenticator
            .as_ref()
            .and_then(|auth| auth.authorization(record.method(), &url));
        let ctx = RequestContext {
            url: &url,
            authorization,
            user_agent_header: &state.user_agent_header,
            session_id: state.session.id.as_deref(),
            current_scale: state.session.scale,
        };
        let wire = request::serialize(&record, &ctx);

        let cseq = record.cseq();
        let method = record.method();
        let bytes = wire.len();
        // Discoverable before any response to it can be read.
        state.awaiting_response.enqueue(record);
        let queued = match state.connection.as_ref() {
            Some(connection) => connection.send(Outgoing::Request {
                cseq,
                bytes: wire.into_bytes(),
            }),
            None => Ok(()),
        };
        match queued {
            Ok(()) => tracing::debug!(cseq, %method, url = %url, bytes, "request sent"),
            Err(e) => self.fail_write(state, Some(cseq), e, completions),
        }
    }

    /// The writer for `connection_id` could not write; fail the request it
    /// was writing and drop the connection.
    pub(crate) fn write_failed(&self, connection_id: u64, cseq: Option<u32>, error: io::Error) {
        let mut completions = Completions::new();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.connection.as_ref().map(|c| c.id) != Some(connection_id) {
                tracing::debug!(connection = connection_id, error = %error, "write failed on old connection");
                return;
            }
            self.fail_write(state, cseq, error, &mut completions);
        }
        self.run_completions(completions);
    }

    fn fail_write(&self, state: &mut ClientState, cseq: Option<u32>, error: io::Error, completions: &mut Completions) {
        let err = RtspError::WriteFailure(error);
        tracing::warn!(cseq = ?cseq, error = %err, "write failed");
        if let Some(record) = cseq.and_then(|cseq| state.awaiting_response.find_and_remove(cseq)) {
            completions.push((record, Reply::failed(&err)));
        }
        self.reset_connection(state, &RtspError::ConnectionLost(err.to_string()), completions);
    }

    /// Drop the connection (if any) and fail everything sent or waiting on it.
    fn reset_connection(&self, state: &mut ClientState, err: &RtspError, completions: &mut Completions) {
        if let Some(connection) = state.connection.take() {
            tracing::info!(peer = %connection.peer_addr(), reason = %err, "disconnecting");
        }
        state.epoch += 1;
        state.tunnel_ready = false;
        fail_all(state.awaiting_response.drain_all(), err, completions);
        fail_all(state.awaiting_tunneling.drain_all(), err, completions);
    }

    fn handle_response(&self, connection_id: u64, response: RtspResponse) {
        let mut completions = Completions::new();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.connection.as_ref().map(|c| c.id) != Some(connection_id) {
                tracing::debug!(connection = connection_id, "response on old connection discarded");
                return;
            }
            let Some(cseq) = response.cseq() else {
                tracing::warn!(status = response.status_code, "response without CSeq discarded");
                return;
            };
            let Some(record) = state.awaiting_response.find_and_remove(cseq) else {
                tracing::warn!(cseq, status = response.status_code, "response matches no outstanding request");
                return;
            };
            tracing::debug!(
                cseq,
                method = %record.method(),
                status = response.status_code,
                reason = %response.reason,
                "response received"
            );
            state.session.observe(record.method(), &response);

            match response.redirect_location().map(str::to_string) {
                Some(location) if state.redirects < MAX_REDIRECTS => {
                    self.redirect(state, record, location, &mut completions);
                }
                _ => {
                    state.redirects = 0;
                    if record.method() == Method::Describe && response.is_success() {
                        let base = response
                            .get_header("Content-Base")
                            .or_else(|| response.get_header("Content-Location"));
                        if let Some(base) = base {
                            tracing::debug!(base_url = base, "base URL updated");
                            state.base_url = base.to_string();
                        }
                    }
                    completions.push((record, Reply::from_response(response)));
                }
            }
        }
        self.run_completions(completions);
    }

    /// Follow a 301/302: reconnect to `location` and reissue the command
    /// there ahead of anything else waiting.
    fn redirect(&self, state: &mut ClientState, record: RequestRecord, location: String, completions: &mut Completions) {
        tracing::info!(from = %state.base_url, to = %location, cseq = record.cseq(), "following redirect");
        state.redirects += 1;
        state.base_url = location;
        // The new server knows nothing of the old one's session.
        state.session = ServerSession::default();

        // Commands still waiting for the tunnel were never sent; they follow.
        let unsent = state.awaiting_tunneling.drain_all();
        self.reset_connection(state, &RtspError::ConnectionLost("redirected".to_string()), completions);

        state.cseq += 1;
        let reissued = record.reissue(state.cseq);
        match self.start_connect(state) {
            Ok(()) => {
                for record in unsent {
                    state.awaiting_connection.enqueue(record);
                }
                state.awaiting_connection.requeue_at_head(reissued);
            }
            Err(err) => {
                tracing::warn!(error = %err, "redirect target unusable");
                completions.push((reissued, Reply::failed(&err)));
                fail_all(unsent, &err, completions);
            }
        }
    }

    /// Servers may send requests of their own (e.g. ANNOUNCE, OPTIONS
    /// keepalives). None are supported: answer 405.
    fn reject_request(&self, connection_id: u64, request: IncomingRequest) {
        tracing::debug!(method = %request.method, uri = %request.uri, "rejecting server request");
        let Some(cseq) = request.cseq else {
            return;
        };
        let mut completions = Completions::new();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let Some(connection) = state.connection.as_ref().filter(|c| c.id == connection_id) else {
                return;
            };
            let reply = format!("RTSP/1.0 405 Method Not Allowed\r\nCSeq: {cseq}\r\n\r\n");
            if let Err(e) = connection.send(Outgoing::Reply(reply.into_bytes())) {
                tracing::warn!(error = %e, "failed to answer server request");
                self.fail_write(state, None, e, &mut completions);
            }
        }
        self.run_completions(completions);
    }

    fn run_completions(&self, completions: Completions) {
        for (record, reply) in completions {
            record.complete(self, reply);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_with_and_without_app_name() {
        assert_eq!(user_agent_header(None), format!("User-Agent: {LIBRARY_AGENT}\r\n"));
        assert_eq!(user_agent_header(Some("")), format!("User-Agent: {LIBRARY_AGENT}\r\n"));
        assert_eq!(
            user_agent_header(Some("probe")),
            format!("User-Agent: probe ({LIBRARY_AGENT})\r\n")
        );
    }

    #[test]
    fn bad_url_fails_synchronously() {
        let client = RtspClient::new("http://example.com/stream", ClientConfig::default());
        let (tx, rx) = std::sync::mpsc::channel();
        let cseq = client.send_options(move |_, reply| tx.send(reply).unwrap());
        assert_eq!(cseq, 0);
        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.code, 0);
        assert!(reply.text.contains("invalid RTSP URL"));
        assert_eq!(client.queue_depths(), QueueDepths::default());
    }

    #[test]
    fn overlong_url_fails_synchronously() {
        let config = ClientConfig {
            max_url_len: 16,
            ..Default::default()
        };
        let client = RtspClient::new("rtsp://example.com/a/very/long/path", config);
        let (tx, rx) = std::sync::mpsc::channel();
        assert_eq!(client.send_describe(move |_, reply| tx.send(reply).unwrap()), 0);
        assert!(rx.try_recv().unwrap().text.contains("too long"));
    }

    #[test]
    fn close_on_idle_client_is_harmless() {
        let client = RtspClient::new("rtsp://127.0.0.1/x", ClientConfig::default());
        client.close();
        client.close();
        assert!(!client.is_connected());
    }

    #[test]
    fn reply_from_response() {
        let response = RtspResponse::new(
            crate::protocol::StatusLine::parse("RTSP/1.0 404 Not Found").unwrap(),
            vec![("CSeq".to_string(), "3".to_string())],
            Vec::new(),
        );
        let reply = Reply::from_response(response);
        assert_eq!(reply.code, 404);
        assert_eq!(reply.text, "Not Found");
        assert!(!reply.is_success());
        assert_eq!(reply.body_text().as_deref(), Some(""));
    }
}
