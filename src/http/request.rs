//! HTTP/1.1 request parsing using the [`httparse`] crate.
//!
//! [`Request::parse`] runs over the session's accumulated read buffer and
//! reports [`ParseError::Incomplete`] until a full header block has arrived,
//! so the connection loop can interleave reads and parse attempts.

use percent_encoding::percent_decode_str;
use thiserror::Error;

use super::Headers;

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// More data is needed to complete the request head. Not a failure;
    /// the caller reads more bytes and retries.
    #[error("request head is incomplete — more data needed")]
    Incomplete,

    #[error("malformed request line")]
    MalformedRequestLine,

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("unsupported HTTP version: {0}")]
    UnsupportedVersion(String),

    #[error("malformed header line")]
    MalformedHeader,

    #[error("invalid request path")]
    InvalidPath,
}

impl From<httparse::Error> for ParseError {
    fn from(err: httparse::Error) -> Self {
        match err {
            httparse::Error::HeaderName
            | httparse::Error::HeaderValue
            | httparse::Error::TooManyHeaders => Self::MalformedHeader,
            // Everything else is a framing failure of the request line,
            // including version strings httparse cannot even tokenize.
            _ => Self::MalformedRequestLine,
        }
    }
}

/// A parsed GET request.
///
/// The stored path is percent-decoded and lexically normalized: `.` and `..`
/// segments are collapsed before any filesystem access, and `..` can never
/// climb above `/`.
///
/// # Examples
///
/// ```
/// use staticd::http::Request;
///
/// let raw = b"GET /docs/../hello%20world.txt HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, consumed) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.path(), "/hello world.txt");
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// assert_eq!(consumed, raw.len());
/// ```
#[derive(Debug)]
pub struct Request {
    method: String,
    path: String,
    headers: Headers,
}

impl Request {
    /// Maximum number of headers accepted per request.
    const MAX_HEADERS: usize = 64;

    /// Parses a request head from the accumulated buffer.
    ///
    /// Returns the request and the number of bytes consumed (the offset just
    /// past the `\r\n\r\n` terminator); the caller drops those bytes before
    /// the next parse attempt.
    ///
    /// # Errors
    ///
    /// - [`ParseError::Incomplete`] — the header block has not fully arrived.
    /// - [`ParseError::MalformedRequestLine`] / [`ParseError::MalformedHeader`]
    ///   — the bytes cannot frame as an HTTP/1.x request head.
    /// - [`ParseError::UnsupportedMethod`] — any method other than `GET`.
    /// - [`ParseError::UnsupportedVersion`] — any version other than `HTTP/1.1`.
    /// - [`ParseError::InvalidPath`] — the target does not percent-decode to
    ///   valid UTF-8.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), ParseError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Request::new(&mut headers);

        let consumed = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(ParseError::Incomplete),
        };

        let method = raw.method.ok_or(ParseError::MalformedRequestLine)?;
        if method != "GET" {
            return Err(ParseError::UnsupportedMethod(method.to_owned()));
        }

        let version = raw.version.ok_or(ParseError::MalformedRequestLine)?;
        if version != 1 {
            return Err(ParseError::UnsupportedVersion(format!("HTTP/1.{version}")));
        }

        let target = raw.path.ok_or(ParseError::MalformedRequestLine)?;
        let decoded = percent_decode_str(target)
            .decode_utf8()
            .map_err(|_| ParseError::InvalidPath)?;
        let path = normalize_path(&decoded);

        let mut header_map = Headers::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            let value =
                std::str::from_utf8(header.value).map_err(|_| ParseError::MalformedHeader)?;
            header_map.push(header.name.trim(), value.trim());
        }

        Ok((
            Self {
                method: method.to_owned(),
                path,
                headers: header_map,
            },
            consumed,
        ))
    }

    /// Returns the request method (always `GET` for a parsed request).
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the decoded, normalized request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Whether the client asked to keep the connection open.
    ///
    /// The value comparison is deliberately case-sensitive: anything other
    /// than a literal `keep-alive`, including absence of the header, means
    /// the connection closes after this response.
    pub fn wants_keep_alive(&self) -> bool {
        self.headers.get("Connection") == Some("keep-alive")
    }

    /// Whether `Accept-Encoding` advertises gzip as an exact list token.
    pub fn accepts_gzip(&self) -> bool {
        self.headers
            .get_all("Accept-Encoding")
            .flat_map(|value| value.split(','))
            .any(|token| token.trim() == "gzip")
    }

    /// The client's cached validator, if it sent one.
    pub fn if_none_match(&self) -> Option<&str> {
        self.headers.get("If-None-Match")
    }
}

/// Lexically normalizes a decoded request target into an absolute path.
///
/// Empty and `.` segments vanish, `..` pops the previous segment and is a
/// no-op at the root, and a path that normalizes to the bare root becomes
/// `/index.html`.
fn normalize_path(decoded: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return "/index.html".to_owned();
    }

    let mut path = String::with_capacity(decoded.len());
    for segment in &segments {
        path.push('/');
        path.push_str(segment);
    }
    path
}
