use crate::error::{ParseErrorKind, Result};

/// A parsed RTSP response (RFC 2326 §7).
///
/// RTSP responses follow HTTP/1.1 syntax:
///
/// ```text
/// RTSP-Version SP Status-Code SP Reason-Phrase CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body of Content-Length bytes]
/// ```
///
/// When the control channel is tunneled over HTTP the version token is
/// `HTTP/1.x` instead; both are accepted.
///
/// Header lookup is case-insensitive per RFC 2326 §4.2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspResponse {
    /// Protocol version token (e.g. `RTSP/1.0`).
    pub version: String,
    pub status_code: u16,
    /// Reason phrase; may be empty.
    pub reason: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// The three fields of a status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: String,
    pub status_code: u16,
    pub reason: String,
}

impl StatusLine {
    /// Parse `RTSP/<ver> <code> <reason>` or `HTTP/<ver> <code> <reason>`.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseErrorKind::EmptyStatusLine.into());
        }

        let (version, rest) = line
            .split_once(|c: char| c == ' ' || c == '\t')
            .ok_or(ParseErrorKind::InvalidStatusLine)?;
        if !is_status_version(version) {
            return Err(ParseErrorKind::InvalidStatusLine.into());
        }

        let rest = rest.trim_start();
        let (code, reason) = rest
            .split_once(|c: char| c == ' ' || c == '\t')
            .unwrap_or((rest, ""));
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseErrorKind::InvalidStatusCode.into());
        }
        let status_code = code
            .parse()
            .map_err(|_| ParseErrorKind::InvalidStatusCode)?;

        Ok(StatusLine {
            version: version.to_string(),
            status_code,
            reason: reason.trim().to_string(),
        })
    }
}

/// Whether a start-line token names a response version (`RTSP/x` or `HTTP/x`).
pub fn is_status_version(token: &str) -> bool {
    token.starts_with("RTSP/") || token.starts_with("HTTP/")
}

/// Split a header line into trimmed (name, value).
pub fn parse_header_line(line: &str) -> Result<(String, String)> {
    let (name, value) = line.split_once(':').ok_or(ParseErrorKind::InvalidHeader)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ParseErrorKind::InvalidHeader.into());
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Case-insensitive header lookup over (name, value) pairs.
pub fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

impl RtspResponse {
    pub fn new(status: StatusLine, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        RtspResponse {
            version: status.version,
            status_code: status.status_code,
            reason: status.reason,
            headers,
            body,
        }
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// The echoed CSeq (RFC 2326 §12.17), if present and numeric.
    pub fn cseq(&self) -> Option<u32> {
        self.get_header("CSeq")?.parse().ok()
    }

    /// Whether the status code is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Whether this is a redirect the client follows (301/302 with `Location`).
    pub fn redirect_location(&self) -> Option<&str> {
        match self.status_code {
            301 | 302 => self.get_header("Location"),
            _ => None,
        }
    }

    /// Body as text (lossy), e.g. the SDP of a DESCRIBE reply.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
