//! Incremental HTTP request recognition.
//!
//! # Responsibilities
//! - Accumulate raw client bytes until a complete request is buffered
//! - Parse the request line and header fields (lenient, line oriented)
//! - Derive the routing tuple (host, port, keep-alive) for bridge selection
//!
//! # Design Decisions
//! - A request is complete once `\r\n\r\n` is buffered; a POST additionally
//!   waits for `Content-Length` body bytes
//! - Malformed header lines are skipped, never fatal
//! - The raw buffered bytes are kept verbatim for forwarding

use std::collections::HashMap;
use thiserror::Error;

/// End of the header section.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Default destination port for plain HTTP requests.
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Default destination port for CONNECT tunnels.
pub const DEFAULT_CONNECT_PORT: u16 = 443;

/// Reasons a buffered request cannot be routed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Request line is not `METHOD SP PATH SP VERSION`.
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),

    /// POST without a `Content-Length` header.
    #[error("POST request without Content-Length")]
    MissingContentLength,

    /// `Content-Length` is not a non-negative integer.
    #[error("invalid Content-Length: {0:?}")]
    InvalidContentLength(String),

    /// Non-CONNECT request without a usable `Host` header.
    #[error("missing Host header")]
    MissingHost,

    /// Host or port in the authority could not be parsed.
    #[error("invalid authority: {0:?}")]
    InvalidAuthority(String),

    /// The buffer grew past the configured request cap.
    #[error("request exceeds {0} bytes")]
    TooLarge(usize),
}

impl ParseError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ParseError::MalformedRequestLine(_) => "request_line",
            ParseError::MissingContentLength => "missing_content_length",
            ParseError::InvalidContentLength(_) => "invalid_content_length",
            ParseError::MissingHost => "missing_host",
            ParseError::InvalidAuthority(_) => "invalid_authority",
            ParseError::TooLarge(_) => "too_large",
        }
    }
}

/// Where a request should be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Destination host name or address literal (no brackets).
    pub host: String,
    /// Destination port.
    pub port: u16,
    /// Client asked for `Proxy-Connection: keep-alive`.
    pub keep_alive: bool,
}

/// Parsed request line and header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    /// Requested path with any leading `http://host` removed.
    pub path: String,
    pub version: String,
    /// Header fields keyed as received; duplicates keep the last value.
    pub headers: HashMap<String, String>,
    /// Same fields keyed by lowercased name; the last case variant received wins.
    folded: HashMap<String, String>,
}

impl RequestHead {
    /// Parse the header section (everything before the terminator).
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut lines = text.lines();
        let request_line = lines.next().unwrap_or_default();
        let malformed = || ParseError::MalformedRequestLine(request_line.to_string());

        let first_space = request_line.find(' ').filter(|&i| i > 0).ok_or_else(malformed)?;
        let method = &request_line[..first_space];
        let rest = request_line[first_space..].trim();

        let last_space = rest.rfind(' ').filter(|&i| i > 0).ok_or_else(malformed)?;
        let version = rest[last_space..].trim();
        let path = strip_http_scheme(rest[..last_space].trim_end());

        let mut headers = HashMap::new();
        let mut folded = HashMap::new();
        for line in lines {
            let Some(colon) = line.find(':') else { continue };
            if colon == 0 || colon == line.len() - 1 {
                continue;
            }
            let name = &line[..colon];
            let value = line[colon + 1..].trim().to_string();
            folded.insert(name.to_ascii_lowercase(), value.clone());
            headers.insert(name.to_string(), value);
        }

        Ok(Self {
            method: method.to_string(),
            path,
            version: version.to_string(),
            headers,
            folded,
        })
    }

    /// Look up a header; an exact match wins, otherwise the last field
    /// received whose name matches ASCII case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .or_else(|| self.folded.get(&name.to_ascii_lowercase()))
            .map(String::as_str)
    }

    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    fn is_post(&self) -> bool {
        self.method.eq_ignore_ascii_case("POST")
    }

    /// `Proxy-Connection: keep-alive` was sent.
    pub fn keep_alive(&self) -> bool {
        self.header("Proxy-Connection")
            .map(|v| v.eq_ignore_ascii_case("keep-alive"))
            .unwrap_or(false)
    }

    /// Body length a request must carry before it is complete.
    ///
    /// Only POST bodies are awaited; everything else completes at the
    /// header terminator.
    pub fn expected_body_len(&self) -> Result<usize, ParseError> {
        if !self.is_post() {
            return Ok(0);
        }
        let raw = self.header("Content-Length").ok_or(ParseError::MissingContentLength)?;
        raw.trim()
            .parse::<usize>()
            .map_err(|_| ParseError::InvalidContentLength(raw.to_string()))
    }

    /// Resolve the destination of this request.
    pub fn route(&self) -> Result<Route, ParseError> {
        let (host, port) = if self.is_connect() {
            split_authority(&self.path, DEFAULT_CONNECT_PORT)?
        } else {
            let host = self
                .header("Host")
                .filter(|h| !h.is_empty())
                .ok_or(ParseError::MissingHost)?;
            split_authority(host, DEFAULT_HTTP_PORT)?
        };

        Ok(Route {
            host,
            port,
            keep_alive: self.keep_alive(),
        })
    }
}

/// A fully buffered request, ready for routing.
#[derive(Debug)]
pub struct CompleteRequest {
    pub head: RequestHead,
    /// Every byte received so far, forwarded verbatim for plain HTTP.
    pub raw: Vec<u8>,
    /// Length of the header section, terminator included.
    pub header_len: usize,
}

impl CompleteRequest {
    /// Bytes that arrived after the header section.
    pub fn trailing(&self) -> &[u8] {
        &self.raw[self.header_len.min(self.raw.len())..]
    }
}

/// Growing receive buffer that recognizes request completeness.
#[derive(Debug)]
pub struct RequestBuffer {
    buf: Vec<u8>,
    /// Offset from which the next terminator search starts.
    scanned: usize,
    /// Header section end (terminator included) and parsed head, once seen.
    header: Option<(usize, RequestHead)>,
    max_bytes: usize,
}

impl RequestBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            header: None,
            max_bytes,
        }
    }

    /// Bytes buffered so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append received bytes and re-evaluate completeness.
    ///
    /// Returns `Ok(None)` while more bytes are needed. Once complete the
    /// buffer is handed over and this value is left empty.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<CompleteRequest>, ParseError> {
        self.buf.extend_from_slice(chunk);

        if self.header.is_none() {
            let start = self.scanned.saturating_sub(HEADER_TERMINATOR.len() - 1);
            match find_terminator(&self.buf[start..]) {
                Some(pos) => {
                    let end = start + pos + HEADER_TERMINATOR.len();
                    let text = String::from_utf8_lossy(&self.buf[..end - HEADER_TERMINATOR.len()]);
                    let head = RequestHead::parse(&text)?;
                    self.header = Some((end, head));
                }
                None => {
                    self.scanned = self.buf.len();
                    if self.buf.len() > self.max_bytes {
                        return Err(ParseError::TooLarge(self.max_bytes));
                    }
                    return Ok(None);
                }
            }
        }

        let needed = match &self.header {
            Some((header_end, head)) => header_end.saturating_add(head.expected_body_len()?),
            None => return Ok(None),
        };
        if needed > self.max_bytes {
            return Err(ParseError::TooLarge(self.max_bytes));
        }
        if self.buf.len() < needed {
            return Ok(None);
        }

        let Some((header_len, head)) = self.header.take() else {
            return Ok(None);
        };
        self.scanned = 0;
        Ok(Some(CompleteRequest {
            head,
            raw: std::mem::take(&mut self.buf),
            header_len,
        }))
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len()).position(|w| w == HEADER_TERMINATOR)
}

/// Drop a leading `http://authority` so only the origin path remains.
fn strip_http_scheme(path: &str) -> String {
    let is_absolute = path
        .get(..7)
        .map(|scheme| scheme.eq_ignore_ascii_case("http://"))
        .unwrap_or(false);
    if !is_absolute {
        return path.to_string();
    }
    match path[7..].find('/') {
        Some(slash) => path[7 + slash..].to_string(),
        None => "/".to_string(),
    }
}

/// Split `host[:port]` (IPv6 literals in brackets) into its parts.
///
/// An absent or empty port yields `default_port`.
pub fn split_authority(authority: &str, default_port: u16) -> Result<(String, u16), ParseError> {
    let invalid = || ParseError::InvalidAuthority(authority.to_string());
    let authority = authority.trim();

    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let close = bracketed.find(']').ok_or_else(invalid)?;
        let rest = &bracketed[close + 1..];
        let port = match rest.strip_prefix(':') {
            Some(port) => port,
            None if rest.is_empty() => "",
            None => return Err(invalid()),
        };
        (&bracketed[..close], port)
    } else {
        match authority.split_once(':') {
            Some((host, port)) => (host, port),
            None => (authority, ""),
        }
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port = if port.is_empty() {
        default_port
    } else {
        port.parse::<u16>().ok().filter(|&p| p != 0).ok_or_else(invalid)?
    };
    Ok((host.to_string(), port))
}
