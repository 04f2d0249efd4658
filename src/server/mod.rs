//! Async TCP server and per-connection session loop.
//!
//! Each accepted connection gets its own Tokio task running the session
//! state machine: await a request under a read deadline, parse it, resolve
//! the resource, negotiate conditional/compressed representation, write the
//! response, then either loop for the next keep-alive request or close.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::compress;
use crate::config::Config;
use crate::http::response::SERVER_NAME;
use crate::http::{Request, Response, StatusCode, request::ParseError};
use crate::resource::{self, ResolveError, ResourceInfo};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Upper bound on a buffered request head; anything larger is treated as
/// malformed input.
const MAX_REQUEST_HEAD: usize = 64 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The staticd server: a TCP listener plus the immutable configuration
/// shared by every connection session.
///
/// # Examples
///
/// ```rust,no_run
/// use staticd::{Config, Server};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::load("staticd.json")?;
///     let server = Server::bind(config).await?;
///     server.run().await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Arc<Config>,
}

impl Server {
    /// Binds the listener on `0.0.0.0:<config.port>`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(config: Config) -> Result<Self, ServerError> {
        let addr = format!("0.0.0.0:{}", config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind { addr, source: e })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            config: Arc::new(config),
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections forever, spawning one session task per connection.
    ///
    /// Sessions share nothing but the read-only configuration, so there is
    /// no cross-task synchronization.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(
            address = %self.local_addr,
            root = %self.config.document_root.display(),
            "staticd listening"
        );

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let config = Arc::clone(&self.config);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, config).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Outcome of waiting for the next request on a persistent connection.
enum NextRequest {
    Parsed(Request),
    /// The peer idled past the deadline or closed cleanly between requests.
    /// Deliberately not an error: clients are expected to idle out.
    Quiet,
    /// Bytes arrived but never became a valid request head.
    Malformed(ParseError),
}

/// Runs one connection's session loop.
///
/// The socket closes exactly once, on task exit, whichever way the loop
/// ends: request cap reached, close decision, malformed input, idle
/// timeout, or I/O failure.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<Config>,
) -> Result<(), io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    let mut served = 0u32;

    while served < config.max_requests_per_connection {
        let request = match next_request(&mut stream, &mut buf, &config).await? {
            NextRequest::Parsed(request) => request,
            NextRequest::Quiet => {
                debug!(peer = %peer_addr, served, "idle connection closed");
                break;
            }
            NextRequest::Malformed(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request");
                let response = Response::error(StatusCode::BadRequest, &config);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };
        served += 1;

        let response = respond(&request, &config).await;
        let status = response.status();
        info!(
            peer = %peer_addr,
            status = status.as_u16(),
            method = %request.method(),
            path = %request.path(),
            user_agent = request.headers().get("User-Agent").unwrap_or("-"),
            "request served"
        );

        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        // Error responses carry Connection: close; honor it here too.
        if !(status.is_healthy() && request.wants_keep_alive()) {
            debug!(peer = %peer_addr, served, "closing connection");
            break;
        }
    }

    Ok(())
}

/// Waits for a complete request head under the idle-read deadline.
///
/// The deadline covers the whole head: it is set on entry (i.e. reset after
/// every previously completed request) and not extended by partial reads.
async fn next_request(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    config: &Config,
) -> Result<NextRequest, io::Error> {
    let deadline = Instant::now() + config.idle_timeout();

    loop {
        match Request::parse(buf) {
            Ok((request, consumed)) => {
                let _ = buf.split_to(consumed);
                return Ok(NextRequest::Parsed(request));
            }
            Err(ParseError::Incomplete) => {}
            Err(e) => return Ok(NextRequest::Malformed(e)),
        }

        if buf.len() > MAX_REQUEST_HEAD {
            return Ok(NextRequest::Malformed(ParseError::MalformedRequestLine));
        }

        match tokio::time::timeout_at(deadline, stream.read_buf(buf)).await {
            // Deadline passed: quiet if the peer had sent nothing yet, a
            // half-sent request head otherwise.
            Err(_) => {
                return Ok(if buf.is_empty() {
                    NextRequest::Quiet
                } else {
                    NextRequest::Malformed(ParseError::MalformedRequestLine)
                });
            }
            // EOF: same split as the deadline case.
            Ok(Ok(0)) => {
                return Ok(if buf.is_empty() {
                    NextRequest::Quiet
                } else {
                    NextRequest::Malformed(ParseError::MalformedRequestLine)
                });
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e),
        }
    }
}

/// Turns one parsed request into a response.
///
/// Permission failures and non-file resources answer 404 alongside genuine
/// misses: this server does not reveal whether a forbidden path exists.
async fn respond(request: &Request, config: &Config) -> Response {
    let info = match resource::resolve(request.path(), config).await {
        Ok(info) => info,
        Err(ResolveError::NotFound) | Err(ResolveError::PermissionDenied) => {
            return Response::error(StatusCode::NotFound, config);
        }
        Err(ResolveError::Io(e)) => {
            warn!(path = %request.path(), error = %e, "resolve failed");
            return Response::error(StatusCode::InternalServerError, config);
        }
    };

    if !info.is_file {
        return Response::error(StatusCode::NotFound, config);
    }

    match serve_file(request, &info, config).await {
        Ok(response) => response,
        Err(e) => {
            warn!(path = %info.local_file_path.display(), error = %e, "file read failed");
            Response::error(StatusCode::InternalServerError, config)
        }
    }
}

/// Builds the success-path response: conditional check, gzip negotiation,
/// and the standard header set in its pinned order.
async fn serve_file(
    request: &Request,
    info: &ResourceInfo,
    config: &Config,
) -> Result<Response, io::Error> {
    // The validator must match byte-for-byte, W/ prefix included.
    let not_modified = request.if_none_match() == Some(info.etag.as_str());

    let mut body = if not_modified {
        Vec::new()
    } else {
        tokio::fs::read(&info.local_file_path).await?
    };

    let status = if not_modified {
        StatusCode::NotModified
    } else {
        StatusCode::Ok
    };

    // Expires mirrors Date: responses are revalidated, never freshness-cached.
    let now = httpdate::fmt_http_date(SystemTime::now());
    let mut response = Response::new(status)
        .header("Server", SERVER_NAME)
        .header("Date", now.clone())
        .header("Expires", now);

    // A 304 keeps its validator but drops body-describing headers.
    if !not_modified {
        response = response.header("Content-Type", info.content_type.as_str());
    }
    if !info.etag.is_empty() {
        response = response.header("ETag", info.etag.as_str());
    }

    if !not_modified && request.accepts_gzip() {
        match compress::gzip(&body) {
            Ok(compressed) => {
                body = compressed;
                response = response
                    .header("Content-Encoding", "gzip")
                    .header("Vary", "Accept-Encoding");
            }
            // Non-fatal: the identity body still goes out.
            Err(e) => warn!(error = %e, "gzip failed, sending identity body"),
        }
    }

    if request.wants_keep_alive() {
        response = response.header("Connection", "keep-alive").header(
            "Keep-Alive",
            format!(
                "timeout={}, max={}",
                config.timeout, config.max_requests_per_connection
            ),
        );
    } else {
        response = response.header("Connection", "close");
    }

    Ok(response.body_bytes(body))
}
