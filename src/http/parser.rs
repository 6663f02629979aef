//! Incremental HTTP/1.x request parser.
//!
//! The parser is fed whatever bytes the connection has buffered. It consumes
//! complete elements only (the request line, whole header lines, body bytes)
//! and leaves a partial line in the caller's buffer until more data arrives,
//! which makes the result independent of how the stream was chunked.

use bytes::BytesMut;
use url::Url;

use crate::http::buffer::DEFAULT_CAPACITY;
use crate::http::request::{ConnectionType, Method, Request};

/// Longest accepted request target.
pub const MAX_URI_LENGTH: usize = 4196;

/// Room for the method, the version and the separators around the URI.
const MAX_REQUEST_LINE: usize = MAX_URI_LENGTH + 64;

pub const MAX_HEADER_NAME_LENGTH: usize = 200;

pub const MAX_HEADER_VALUE_LENGTH: usize = 1024;

/// Largest body chunk reserved up front, whatever Content-Length claims.
const MAX_BODY_RESERVE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid request line: {0}")]
    MalformedRequestLine(String),

    #[error("Invalid header name: {0}")]
    InvalidHeaderName(String),

    #[error("Too large header value: {0}")]
    HeaderValueTooLong(String),

    #[error("Bad header value: {0}")]
    BadHeaderValue(String),

    #[error("Too large HTTP header: {0} bytes")]
    RequestHeaderTooLarge(usize),

    #[error("Invalid line break: {0}")]
    InvalidLineBreak(String),
}

/// Where the parser is inside the current request.
///
/// Between calls the parser rests in `FirstLine`, `HeaderName` or `Body`.
/// `AfterName`, `Between` and `HeaderValue` are passed through while a
/// header line is scanned; a folded value line moves `HeaderValue` back to
/// `Between`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Looking for the request line
    FirstLine,
    /// Looking for a complete header name, or the blank line ending the headers
    HeaderName,
    /// Skipping whitespace up to the colon after a header name
    AfterName,
    /// Skipping whitespace up to the start of a header value
    Between,
    /// Reading a header value, possibly across folded lines
    HeaderValue,
    /// Adding bytes to the body
    Body,
}

/// Outcome of one [`RequestParser::parse`] call.
#[derive(Debug)]
pub struct Parsed {
    /// Bytes consumed from the start of the given slice.
    pub consumed: usize,
    /// The request completed by this call, if any.
    pub request: Option<Request>,
}

impl Parsed {
    fn partial(consumed: usize) -> Self {
        Self {
            consumed,
            request: None,
        }
    }

    fn complete(consumed: usize, request: Request) -> Self {
        Self {
            consumed,
            request: Some(request),
        }
    }
}

pub struct RequestParser {
    state: ParserState,
    request: Request,
    body: BytesMut,
    /// Bytes of the request line and headers consumed so far.
    header_bytes: usize,
    max_header_bytes: usize,
    skipped_leading_crlf: bool,
    continue_sent: bool,
    secure: bool,
    line: usize,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::with_max_header_bytes(DEFAULT_CAPACITY)
    }

    /// Creates a parser rejecting requests whose request line plus headers
    /// exceed `max_header_bytes`.
    pub fn with_max_header_bytes(max_header_bytes: usize) -> Self {
        Self {
            state: ParserState::FirstLine,
            request: Request::default(),
            body: BytesMut::new(),
            header_bytes: 0,
            max_header_bytes,
            skipped_leading_crlf: false,
            continue_sent: false,
            secure: false,
            line: 1,
        }
    }

    /// Marks requests from this parser as received over TLS, which changes
    /// the scheme of the URI built from the Host header.
    pub fn set_secure(&mut self, secure: bool) {
        self.secure = secure;
        self.request.secure = secure;
    }

    pub fn current_state(&self) -> ParserState {
        self.state
    }

    /// The request being assembled.
    pub fn current_request(&self) -> &Request {
        &self.request
    }

    /// Returns true exactly once per request when the client sent
    /// `Expect: 100-continue` and the body is still outstanding.
    pub fn should_send_continue(&mut self) -> bool {
        if self.state == ParserState::Body && !self.continue_sent && self.request.expects_continue()
        {
            self.continue_sent = true;
            return true;
        }
        false
    }

    /// Drops the request in progress and starts over.
    pub fn reset(&mut self) {
        self.state = ParserState::FirstLine;
        self.request = Request {
            secure: self.secure,
            ..Request::default()
        };
        self.body = BytesMut::new();
        self.header_bytes = 0;
        self.skipped_leading_crlf = false;
        self.continue_sent = false;
        self.line = 1;
    }

    /// Parses as much of `buf` as possible.
    ///
    /// Stops right after a completed request, so pipelined requests are
    /// returned one per call. Unconsumed bytes must be offered again, with
    /// any new data appended, on the next call.
    pub fn parse(&mut self, buf: &[u8]) -> Result<Parsed, ParseError> {
        let mut pos = 0;

        loop {
            let rest = &buf[pos..];

            match self.state {
                ParserState::FirstLine => match self.parse_first_line(rest)? {
                    Some(n) => pos += self.count_header_bytes(n)?,
                    None => return Ok(Parsed::partial(pos)),
                },

                ParserState::HeaderName
                | ParserState::AfterName
                | ParserState::Between
                | ParserState::HeaderValue => {
                    if rest.starts_with(b"\r\n") {
                        pos += self.count_header_bytes(2)?;
                        if self.request.content_length == 0 {
                            tracing::trace!("Request parsed successfully (no content)");
                            return Ok(Parsed::complete(pos, self.finish()));
                        }
                        self.state = ParserState::Body;
                        self.body
                            .reserve(self.request.content_length.min(MAX_BODY_RESERVE));
                        continue;
                    }

                    if rest.is_empty() || rest == b"\r" {
                        return Ok(Parsed::partial(pos));
                    }

                    match self.parse_header_line(rest)? {
                        Some(n) => pos += self.count_header_bytes(n)?,
                        None => return Ok(Parsed::partial(pos)),
                    }
                }

                ParserState::Body => {
                    let wanted = self.request.content_length - self.body.len();
                    let take = wanted.min(rest.len());
                    self.body.extend_from_slice(&rest[..take]);
                    pos += take;

                    if self.body.len() == self.request.content_length {
                        tracing::trace!(bytes = self.body.len(), "Request parsed successfully");
                        return Ok(Parsed::complete(pos, self.finish()));
                    }
                    return Ok(Parsed::partial(pos));
                }
            }
        }
    }

    fn count_header_bytes(&mut self, n: usize) -> Result<usize, ParseError> {
        self.header_bytes += n;
        if self.header_bytes > self.max_header_bytes {
            return Err(ParseError::RequestHeaderTooLarge(self.header_bytes));
        }
        Ok(n)
    }

    fn finish(&mut self) -> Request {
        let mut request = std::mem::take(&mut self.request);
        request.body = std::mem::take(&mut self.body).freeze();
        self.reset();
        request
    }

    /// Returns the number of bytes of a complete request line (CRLF
    /// included), or `None` when the line has not fully arrived.
    fn parse_first_line(&mut self, rest: &[u8]) -> Result<Option<usize>, ParseError> {
        // RFC 7230 3.5: ignore an empty line received where a request-line is expected
        if !self.skipped_leading_crlf {
            if rest.starts_with(b"\r\n") {
                self.skipped_leading_crlf = true;
                return Ok(Some(2));
            }
            if rest == b"\r" {
                return Ok(None);
            }
        }

        let end = match find_line_end(rest, self.line)? {
            Some(end) => end,
            None => {
                if rest.len() > MAX_REQUEST_LINE {
                    tracing::warn!("HTTP request line is too large");
                    return Err(ParseError::MalformedRequestLine(
                        "Too large request line.".to_string(),
                    ));
                }
                return Ok(None);
            }
        };

        let line = String::from_utf8_lossy(&rest[..end]);
        self.on_first_line(&line)?;
        self.state = ParserState::HeaderName;
        self.line += 1;
        Ok(Some(end + 2))
    }

    /// Request-Line = Method SP Request-URI SP HTTP-Version CRLF
    fn on_first_line(&mut self, line: &str) -> Result<(), ParseError> {
        tracing::debug!(request_line = %line, "Got request");

        let (method, rest) = match line.split_once(' ') {
            Some((method, rest)) if !rest.is_empty() => (method, rest),
            _ => {
                return Err(ParseError::MalformedRequestLine(format!(
                    "missing Method. Line: {line}"
                )));
            }
        };

        let (uri, version) = match rest.split_once(' ') {
            Some((uri, version)) if !uri.is_empty() => (uri, version),
            _ => {
                return Err(ParseError::MalformedRequestLine(format!(
                    "missing URI. Line: {line}"
                )));
            }
        };

        if uri.len() > MAX_URI_LENGTH {
            return Err(ParseError::MalformedRequestLine("Too long uri.".to_string()));
        }

        if version.is_empty() {
            return Err(ParseError::MalformedRequestLine(format!(
                "missing HTTP-Version. Line: {line}"
            )));
        }

        let version_bytes = version.as_bytes();
        if version_bytes.len() < 4 || !version_bytes[..4].eq_ignore_ascii_case(b"HTTP") {
            return Err(ParseError::MalformedRequestLine(format!(
                "Invalid HTTP version. Line: {line}"
            )));
        }

        self.request.method = Method::from_token(method).ok_or_else(|| {
            ParseError::MalformedRequestLine(format!("Invalid method. Line: {line}"))
        })?;
        self.request.set_uri_path(uri);
        self.request.version = version.to_string();
        Ok(())
    }

    /// Scans one header line, including any folded continuation lines.
    ///
    /// Returns the bytes it spans, or `None` when the line, or the first
    /// byte of the following line, has not arrived yet. Name and value
    /// limits are enforced on partial lines too.
    fn parse_header_line(&mut self, rest: &[u8]) -> Result<Option<usize>, ParseError> {
        let mut cursor = ParserState::HeaderName;
        let mut name_end = 0;
        let mut segment_start = 0;
        let mut value = String::new();
        let mut lines = 0;
        let mut i = 0;

        while i < rest.len() {
            let ch = rest[i];

            match cursor {
                ParserState::HeaderName => {
                    if ch == b':' || ch == b' ' || ch == b'\t' {
                        if i == 0 {
                            return Err(ParseError::InvalidHeaderName(format!(
                                "Expected header name, got '{}' on line {}",
                                ch as char, self.line
                            )));
                        }
                        name_end = i;
                        cursor = if ch == b':' {
                            ParserState::Between
                        } else {
                            ParserState::AfterName
                        };
                    } else if (ch == b'\r' || ch == b'\n') && i == 0 {
                        return Err(ParseError::InvalidLineBreak(format!(
                            "Expected CRLF on line {}",
                            self.line
                        )));
                    } else if ch == b'\r' || ch == b'\n' {
                        return Err(ParseError::InvalidHeaderName(format!(
                            "Missing colon after header name on line {}",
                            self.line
                        )));
                    } else if !ch.is_ascii_alphanumeric() && ch != b'-' {
                        return Err(ParseError::InvalidHeaderName(format!(
                            "Invalid character in header name on line {}",
                            self.line
                        )));
                    } else if i >= MAX_HEADER_NAME_LENGTH {
                        return Err(ParseError::InvalidHeaderName(format!(
                            "Header name too long on line {}",
                            self.line
                        )));
                    }
                }

                ParserState::AfterName => {
                    if ch == b':' {
                        cursor = ParserState::Between;
                    } else if ch != b' ' && ch != b'\t' {
                        return Err(ParseError::InvalidHeaderName(format!(
                            "Expected colon after header name on line {}",
                            self.line
                        )));
                    }
                }

                ParserState::Between | ParserState::HeaderValue => {
                    if cursor == ParserState::Between && (ch == b' ' || ch == b'\t') {
                        i += 1;
                        continue;
                    }

                    if ch == b'\r' || ch == b'\n' {
                        if ch == b'\n' || rest.get(i + 1).is_some_and(|&b| b != b'\n') {
                            return Err(ParseError::InvalidLineBreak(format!(
                                "Expected CRLF on line {}",
                                self.line + lines
                            )));
                        }
                        // need the CRLF and the first byte of the next line
                        let Some(&next) = rest.get(i + 2) else {
                            return Ok(None);
                        };

                        if cursor == ParserState::HeaderValue {
                            let segment = String::from_utf8_lossy(&rest[segment_start..i]);
                            push_segment(&mut value, segment.trim_end());
                        }

                        if next == b' ' || next == b'\t' {
                            // folded value continues on the next line
                            tracing::trace!("Header value is on multiple lines");
                            cursor = ParserState::Between;
                            lines += 1;
                            i += 2;
                            continue;
                        }

                        let name = String::from_utf8_lossy(&rest[..name_end]).into_owned();
                        self.on_header(name, value)?;
                        self.line += lines + 1;
                        return Ok(Some(i + 2));
                    }

                    if cursor == ParserState::Between {
                        cursor = ParserState::HeaderValue;
                        segment_start = i;
                    }

                    let separator = usize::from(!value.is_empty());
                    if value.len() + separator + (i - segment_start + 1) > MAX_HEADER_VALUE_LENGTH {
                        return Err(ParseError::HeaderValueTooLong(format!(
                            "on line {}",
                            self.line + lines
                        )));
                    }
                }

                ParserState::FirstLine | ParserState::Body => {
                    unreachable!("header scan cursor never enters {cursor:?}")
                }
            }

            i += 1;
        }

        Ok(None)
    }

    /// Applies the headers that carry request semantics, then stores the
    /// header in the multimap.
    fn on_header(&mut self, name: String, value: String) -> Result<(), ParseError> {
        tracing::trace!(header = %name, value = %value, "Header");

        match name.to_ascii_lowercase().as_str() {
            "content-length" => {
                self.request.content_length = value.trim().parse::<usize>().map_err(|_| {
                    ParseError::BadHeaderValue(format!("Invalid content length: {value}"))
                })?;
            }
            "host" => {
                self.request.uri = Some(self.build_uri(&value)?);
            }
            "connection" => {
                let bytes = value.as_bytes();
                self.request.connection = if value.eq_ignore_ascii_case("close") {
                    Some(ConnectionType::Close)
                } else if bytes.len() >= 10 && bytes[..10].eq_ignore_ascii_case(b"keep-alive") {
                    Some(ConnectionType::KeepAlive)
                } else {
                    return Err(ParseError::BadHeaderValue(format!(
                        "Unknown 'Connection' header type: {value}"
                    )));
                };
            }
            "x-requested-with" | "http_x_requested_with" => {
                if value.eq_ignore_ascii_case("XMLHttpRequest") {
                    self.request.is_ajax = true;
                }
            }
            "accept" => {
                self.request.accept_types =
value
                    .split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            _ => {}
        }

        self.request.headers.append(name, value);
        Ok(())
    }

    fn build_uri(&self, host: &str) -> Result<Url, ParseError> {
        let scheme = if self.secure { "https" } else { "http" };
        let target = &self.request.uri_path;

        let raw = if target.starts_with('/') {
            format!("{scheme}://{host}{target}")
        } else if target == "*" {
            format!("{scheme}://{host}/")
        } else {
            target.clone()
        };

        Url::parse(&raw).map_err(|e| {
            ParseError::BadHeaderValue(format!("Failed to parse uri: {host}{target} ({e})"))
        })
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

fn push_segment(value: &mut String, segment: &str) {
    if segment.is_empty() {
        return;
    }
    if !value.is_empty() {
        value.push(' ');
    }
    value.push_str(segment);
}

/// Index of the CR of the first CRLF in `buf`.
fn find_line_end(buf: &[u8], line: usize) -> Result<Option<usize>, ParseError> {
    for (i, &b) in buf.iter().enumerate() {
        match b {
            b'\n' => {
                return Err(ParseError::InvalidLineBreak(format!(
                    "Expected CRLF, got LF on line {line}"
                )));
            }
            b'\r' => {
                return match buf.get(i + 1) {
                    Some(b'\n') => Ok(Some(i)),
                    Some(_) => Err(ParseError::InvalidLineBreak(format!(
                        "Expected CRLF, got CR on line {line}"
                    ))),
                    None => Ok(None),
                };
            }
            _ => {}
        }
    }
    Ok(None)
}
