//! HTTP/1.1 response builder.
//!
//! Serializes a status, an ordered header set, and a body into wire bytes.
//! `Content-Length` always reflects the bytes actually transmitted, so any
//! compression must happen before the body is handed to the builder.

use bytes::{BufMut, BytesMut};
use tracing::warn;

use super::{Headers, StatusCode};
use crate::config::Config;

/// Value of the `Server` header on every response.
pub const SERVER_NAME: &str = concat!("staticd/", env!("CARGO_PKG_VERSION"));

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// Headers are written in insertion order; callers insert `Server` and
/// `Date` first so the response head is deterministic.
///
/// # Examples
///
/// ```
/// use staticd::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "text/html")
///     .body_bytes(&b"<h1>hi</h1>"[..]);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 11\r\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
}

impl Response {
    /// Creates a response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Builds an error response for `status`.
    ///
    /// The body comes from the configured error document for 403/404/500
    /// when one is present and readable, and degrades to a minimal inline
    /// page otherwise — an error response is always produced. Error
    /// responses unconditionally close the connection.
    pub fn error(status: StatusCode, config: &Config) -> Self {
        let now = httpdate::fmt_http_date(std::time::SystemTime::now());
        Self::new(status)
            .header("Server", SERVER_NAME)
            .header("Date", now)
            .header("Content-Type", "text/html")
            .header("Connection", "close")
            .body_bytes(error_body(status, config))
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    /// Sets the response body from raw bytes.
    ///
    /// The `Content-Length` header is written by [`into_bytes`](Self::into_bytes).
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Serializes the response into a `BytesMut` buffer using HTTP/1.1 wire
    /// format: status line, headers in insertion order, `Content-Length` as
    /// the final header, a blank line, then the body with no separator.
    pub fn into_bytes(self) -> BytesMut {
        let estimated_size = 128 + self.headers.len() * 48 + self.body.len();
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(format!("HTTP/1.1 {}\r\n", self.status).as_bytes());

        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        // Content-Length is always the last header before the blank line.
        buf.put(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        buf.put(&b"\r\n"[..]);

        if !self.body.is_empty() {
            buf.put(self.body.as_slice());
        }

        buf
    }
}

/// Picks the error body: configured document first, inline fallback second.
fn error_body(status: StatusCode, config: &Config) -> Vec<u8> {
    let configured = match status {
        StatusCode::Forbidden => config.error_document_403.as_deref(),
        StatusCode::NotFound => config.error_document_404.as_deref(),
        StatusCode::InternalServerError => config.error_document_500.as_deref(),
        _ => None,
    };

    if let Some(path) = configured {
        match std::fs::read(path) {
            Ok(body) => return body,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "error document unreadable, using fallback");
            }
        }
    }

    format!("<h1>{} {}</h1>\r\n", status.as_u16(), status.canonical_reason()).into_bytes()
}
