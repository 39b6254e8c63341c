use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::client::{RtspClient, WeakClient};
use crate::error::{ParseErrorKind, RtspError};
use crate::protocol::ResponseFramer;

/// Read timeout used to wake the reader for deadline sweeps while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Opens the TCP connection to the server.
///
/// The default [`TcpConnector`] resolves with the system resolver and
/// connects with [`TcpStream::connect_timeout`]. Tests and embedders can
/// substitute their own (e.g. to gate or redirect connects).
pub trait Connector: Send + Sync {
    fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr> {
        (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}:{port}"))
        })
    }

    fn connect(&self, addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Bytes queued for the writer thread.
pub(crate) enum Outgoing {
    /// A request; a failed write is reported against its CSeq.
    Request { cseq: u32, bytes: Vec<u8> },
    /// A reply to a server-initiated request.
    Reply(Vec<u8>),
}

/// Per-connection socket settings taken from the client configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnectionOptions {
    pub(crate) buffer_size: usize,
    pub(crate) max_body_len: usize,
    pub(crate) sweep_deadlines: bool,
    pub(crate) write_timeout: Option<Duration>,
}

/// Handle to the live connection, owned by the client state.
///
/// Writes are handed to a writer thread so that no caller, and no lock,
/// ever waits on the socket. Dropping the handle shuts the socket down,
/// which unblocks both the reader and a writer stuck in `write`.
pub(crate) struct Connection {
    pub(crate) id: u64,
    stream: TcpStream,
    outgoing: mpsc::Sender<Outgoing>,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Start the reader and writer threads on clones of `stream`.
    pub(crate) fn start(
        id: u64,
        stream: TcpStream,
        client: WeakClient,
        options: ConnectionOptions,
    ) -> io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let reader_stream = stream.try_clone()?;
        let writer_stream = stream.try_clone()?;
        if options.sweep_deadlines {
            reader_stream.set_read_timeout(Some(POLL_INTERVAL))?;
        }
        writer_stream.set_write_timeout(options.write_timeout)?;

        let (outgoing, queued) = mpsc::channel();
        let writer_client = client.clone();
        thread::Builder::new()
            .name(format!("rtsp-writer-{id}"))
            .spawn(move || write_loop(&writer_client, writer_stream, id, queued))?;

        thread::Builder::new()
            .name(format!("rtsp-reader-{id}"))
            .spawn(move || {
                let reason = read_loop(&client, reader_stream, id, options);
                if let Some(client) = client.upgrade() {
                    client.connection_closed(id, reason);
                }
            })?;

        tracing::info!(%peer_addr, connection = id, "connected to RTSP server");
        Ok(Connection {
            id,
            stream,
            outgoing,
            peer_addr,
        })
    }

    pub(crate) fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Queue bytes for the writer thread. Fails once the writer has stopped.
    pub(crate) fn send(&self, message: Outgoing) -> io::Result<()> {
        self.outgoing
            .send(message)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "connection writer has stopped"))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            tracing::trace!(peer = %self.peer_addr, error = %e, "shutdown on already-closed socket");
        }
    }
}

/// Writer loop: writes queued messages in order until the connection is
/// dropped or a write fails. A short or timed-out write is a failure.
fn write_loop(client: &WeakClient, mut stream: TcpStream, id: u64, queued: mpsc::Receiver<Outgoing>) {
    for message in queued {
        let (cseq, bytes) = match message {
            Outgoing::Request { cseq, bytes } => (Some(cseq), bytes),
            Outgoing::Reply(bytes) => (None, bytes),
        };
        let result = stream.write_all(&bytes).and_then(|()| stream.flush());
        match result {
            Ok(()) => tracing::trace!(connection = id, bytes = bytes.len(), "written"),
            Err(e) => {
                if let Some(client) = client.upgrade() {
                    client.write_failed(id, cseq, e);
                }
                return;
            }
        }
    }
}

/// Run the connect on its own thread, reporting back to the client.
pub(crate) fn spawn_connect(
    client: RtspClient,
    addr: SocketAddr,
    epoch: u64,
    timeout: Duration,
) -> io::Result<()> {
    thread::Builder::new()
        .name("rtsp-connect".to_string())
        .spawn(move || {
            tracing::debug!(%addr, "connecting");
            let result = client.connector().connect(addr, timeout);
            client.connect_finished(epoch, addr, result);
        })?;
    Ok(())
}

/// Response reader loop. Returns the reason for exiting.
///
/// Every complete message is handed to the client as soon as it is
/// framed. The loop ends on end-of-stream, a read error, an oversized
/// body, or once the client has been dropped.
fn read_loop(client: &WeakClient, mut stream: TcpStream, id: u64, options: ConnectionOptions) -> String {
    let mut framer = ResponseFramer::new(options.buffer_size).with_max_body_len(options.max_body_len);
    let mut buf = vec![0u8; options.buffer_size];

    loop {
        match stream.read(&mut buf) {
            Ok(0) => return "connection closed by server".to_string(),
            Ok(n) => {
                tracing::trace!(connection = id, bytes = n, buffered = framer.buffered_len() + n, "read");
                framer.extend(&buf[..n]);
                let Some(client) = client.upgrade() else {
                    return "client dropped".to_string();
                };
                loop {
                    match framer.next_message() {
                        Ok(Some(message)) => client.handle_message(id, message),
                        Ok(None) => break,
                        Err(RtspError::Parse {
                            kind: ParseErrorKind::BodyTooLarge,
                        }) => {
                            tracing::warn!(connection = id, limit = options.max_body_len, "response body too large");
                            return "response body exceeds limit".to_string();
                        }
                        Err(e) => {
                            tracing::warn!(connection = id, error = %e, "dropping malformed response");
                        }
                    }
                }
                client.expire_requests();
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                match client.upgrade() {
                    Some(client) => client.expire_requests(),
                    None => return "client dropped".to_string(),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return format!("read error: {e}"),
        }
    }
}
