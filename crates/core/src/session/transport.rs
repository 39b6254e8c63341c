/// How the client asks the server to deliver media in SETUP (RFC 2326 §12.39).
///
/// ## Wire format example
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP;unicast;client_port=8000-8001
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1
///
/// Server → Client:
///   Transport: RTP/AVP;unicast;client_port=8000-8001;server_port=5000-5001;ssrc=1A2B3C4D
/// ```
///
/// RTCP always uses the port (or channel) right after the RTP one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSpec {
    /// RTP over UDP to `client_rtp_port`, RTCP to `client_rtp_port + 1`.
    Udp { client_rtp_port: u16 },
    /// RTP interleaved on the RTSP connection on `channel` and `channel + 1`.
    Tcp { channel: u8 },
}

impl TransportSpec {
    /// Value for the request's `Transport` header.
    pub fn header_value(&self) -> String {
        match *self {
            TransportSpec::Udp { client_rtp_port } => format!(
                "RTP/AVP;unicast;client_port={}-{}",
                client_rtp_port,
                client_rtp_port.saturating_add(1)
            ),
            TransportSpec::Tcp { channel } => format!(
                "RTP/AVP/TCP;unicast;interleaved={}-{}",
                channel,
                channel.saturating_add(1)
            ),
        }
    }
}

/// Transport parameters from the server's SETUP reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHeader {
    pub client_port: Option<(u16, u16)>,
    pub server_port: Option<(u16, u16)>,
    pub interleaved: Option<(u8, u8)>,
    pub ssrc: Option<u32>,
}

impl TransportHeader {
    /// Parse the `Transport` header value (RFC 2326 §12.39).
    ///
    /// Unknown parameters are ignored.
    ///
    /// ## Examples
    ///
    /// ```
    /// use rtsp_client::session::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001;server_port=5000-5001");
    /// assert_eq!(th.client_port, Some((8000, 8001)));
    /// assert_eq!(th.server_port, Some((5000, 5001)));
    /// ```
    pub fn parse(header: &str) -> Self {
        let mut parsed = TransportHeader::default();
        for part in header.split(';') {
            let part = part.trim();
            if let Some(ports) = part.strip_prefix("client_port=") {
                parsed.client_port = parse_pair(ports);
            } else if let Some(ports) = part.strip_prefix("server_port=") {
                parsed.server_port = parse_pair(ports);
            } else if let Some(channels) = part.strip_prefix("interleaved=") {
                parsed.interleaved = parse_pair(channels);
            } else if let Some(ssrc) = part.strip_prefix("ssrc=") {
                parsed.ssrc = u32::from_str_radix(ssrc.trim(), 16).ok();
            }
        }
        parsed
    }
}

/// `a-b` → `(a, b)`; a lone `a` means `(a, a + 1)`.
fn parse_pair<T>(raw: &str) -> Option<(T, T)>
where
    T: std::str::FromStr + Copy + TryFrom<u32>,
    u32: From<T>,
{
    match raw.split_once('-') {
        Some((a, b)) => Some((a.trim().parse().ok()?, b.trim().parse().ok()?)),
        None => {
            let a: T = raw.trim().parse().ok()?;
            let b = T::try_from(u32::from(a) + 1).ok()?;
            Some((a, b))
        }
    }
}
