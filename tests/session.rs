//! Socket-level session tests.
//!
//! Each test binds a server on an ephemeral port over a throwaway document
//! root and speaks raw HTTP/1.1 over a TCP socket, so the whole engine is
//! exercised: framing, resolution, negotiation, and the keep-alive loop.

use std::io::Write as _;
use std::net::SocketAddr;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use staticd::{Config, Server};

fn test_config(root: &TempDir) -> Config {
    let mut config: Config =
        serde_json::from_str(r#"{ "document_root": "/placeholder", "port": 0 }"#).unwrap();
    config.document_root = root.path().to_path_buf();
    config
}

fn write_file(root: &TempDir, name: &str, content: &[u8]) {
    let mut file = std::fs::File::create(root.path().join(name)).unwrap();
    file.write_all(content).unwrap();
}

async fn spawn_server(config: Config) -> SocketAddr {
    let server = Server::bind(config).await.unwrap();
    // The listener binds 0.0.0.0; clients dial loopback on the same port.
    let addr = SocketAddr::from(([127, 0, 0, 1], server.local_addr().port()));
    tokio::spawn(server.run());
    addr
}

/// One response off the wire: status code, lowercased header pairs, body.
async fn read_response(stream: &mut TcpStream) -> (u16, Vec<(String, String)>, Vec<u8>) {
    let mut buf = Vec::new();
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before response head completed");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = std::str::from_utf8(&buf[..header_end]).unwrap();
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap();
    assert!(status_line.starts_with("HTTP/1.1 "), "bad status line: {status_line}");
    let status: u16 = status_line.split(' ').nth(1).unwrap().parse().unwrap();

    let headers: Vec<(String, String)> = lines
        .map(|line| {
            let (name, value) = line.split_once(':').unwrap();
            (name.trim().to_ascii_lowercase(), value.trim().to_owned())
        })
        .collect();

    let content_length: usize = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .expect("response carries Content-Length")
        .1
        .parse()
        .unwrap();

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before body completed");
        body.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(body.len(), content_length, "body overrun past Content-Length");

    (status, headers, body)
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

async fn request(addr: SocketAddr, raw: &[u8]) -> (u16, Vec<(String, String)>, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();
    read_response(&mut stream).await
}

#[tokio::test]
async fn serves_file_and_closes_by_default() {
    let root = TempDir::new().unwrap();
    write_file(&root, "hello.txt", b"hello over http");
    let addr = spawn_server(test_config(&root)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /hello.txt HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let (status, headers, body) = read_response(&mut stream).await;

    assert_eq!(status, 200);
    assert_eq!(body, b"hello over http");
    assert_eq!(header(&headers, "connection"), Some("close"));
    assert_eq!(header(&headers, "content-type"), Some("text/plain"));
    assert!(header(&headers, "server").unwrap().starts_with("staticd/"));
    assert!(header(&headers, "etag").unwrap().starts_with("W/\""));
    // Expires mirrors Date.
    assert_eq!(header(&headers, "expires"), header(&headers, "date"));

    // No keep-alive was requested, so the server closes.
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn root_serves_index_html() {
    let root = TempDir::new().unwrap();
    write_file(&root, "index.html", b"<h1>front page</h1>");
    let addr = spawn_server(test_config(&root)).await;

    let (status, headers, body) =
        request(addr, b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert_eq!(status, 200);
    assert_eq!(body, b"<h1>front page</h1>");
    assert_eq!(header(&headers, "content-type"), Some("text/html"));
}

#[tokio::test]
async fn missing_resource_is_404_with_close() {
    let root = TempDir::new().unwrap();
    let addr = spawn_server(test_config(&root)).await;

    let (status, headers, body) =
        request(addr, b"GET /absent.html HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert_eq!(status, 404);
    assert_eq!(header(&headers, "connection"), Some("close"));
    assert!(String::from_utf8(body).unwrap().contains("404 Not Found"));
}

#[tokio::test]
async fn configured_error_document_is_served() {
    let root = TempDir::new().unwrap();
    write_file(&root, "404.html", b"<h1>custom miss page</h1>");

    let mut config = test_config(&root);
    config.error_document_404 = Some(root.path().join("404.html"));
    let addr = spawn_server(config).await;

    let (status, _, body) =
        request(addr, b"GET /absent.html HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert_eq!(status, 404);
    assert_eq!(body, b"<h1>custom miss page</h1>");
}

#[tokio::test]
async fn post_is_rejected_with_400() {
    let root = TempDir::new().unwrap();
    write_file(&root, "hello.txt", b"hi");
    let addr = spawn_server(test_config(&root)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"POST /hello.txt HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let (status, headers, _) = read_response(&mut stream).await;
    assert_eq!(status, 400);
    assert_eq!(header(&headers, "connection"), Some("close"));

    // The connection is done; nothing further is read or served.
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn matching_validator_yields_304_without_body() {
    let root = TempDir::new().unwrap();
    write_file(&root, "page.html", b"<h1>cacheable</h1>");
    let addr = spawn_server(test_config(&root)).await;

    let (status, headers, _) =
        request(addr, b"GET /page.html HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert_eq!(status, 200);
    let etag = header(&headers, "etag").unwrap().to_owned();

    let revalidate = format!(
        "GET /page.html HTTP/1.1\r\nHost: localhost\r\nIf-None-Match: {etag}\r\n\r\n"
    );
    let (status, headers, body) = request(addr, revalidate.as_bytes()).await;
    assert_eq!(status, 304);
    assert!(body.is_empty());
    assert_eq!(header(&headers, "content-length"), Some("0"));
    assert_eq!(header(&headers, "etag"), Some(etag.as_str()));
    // Body-describing headers are dropped on a 304.
    assert_eq!(header(&headers, "content-type"), None);
}

#[tokio::test]
async fn stale_validator_yields_full_response() {
    let root = TempDir::new().unwrap();
    write_file(&root, "page.html", b"<h1>cacheable</h1>");
    let addr = spawn_server(test_config(&root)).await;

    let (status, _, body) = request(
        addr,
        b"GET /page.html HTTP/1.1\r\nHost: localhost\r\nIf-None-Match: \"other\"\r\n\r\n",
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body, b"<h1>cacheable</h1>");
}

#[tokio::test]
async fn gzip_is_negotiated() {
    let root = TempDir::new().unwrap();
    let content = "compress me please ".repeat(100);
    write_file(&root, "big.txt", content.as_bytes());
    let addr = spawn_server(test_config(&root)).await;

    let (status, headers, body) = request(
        addr,
        b"GET /big.txt HTTP/1.1\r\nHost: localhost\r\nAccept-Encoding: deflate, gzip\r\n\r\n",
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(header(&headers, "content-encoding"), Some("gzip"));
    assert_eq!(header(&headers, "vary"), Some("Accept-Encoding"));
    // RFC 1952 magic bytes, and the repetitive body actually shrank.
    assert_eq!(&body[..2], &[0x1f, 0x8b]);
    assert!(body.len() < content.len());
}

#[tokio::test]
async fn identity_body_without_accept_encoding() {
    let root = TempDir::new().unwrap();
    write_file(&root, "plain.txt", b"as-is bytes");
    let addr = spawn_server(test_config(&root)).await;

    let (status, headers, body) =
        request(addr, b"GET /plain.txt HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert_eq!(status, 200);
    assert_eq!(header(&headers, "content-encoding"), None);
    assert_eq!(header(&headers, "vary"), None);
    assert_eq!(body, b"as-is bytes");
}

#[tokio::test]
async fn keep_alive_serves_exactly_the_request_cap() {
    let root = TempDir::new().unwrap();
    write_file(&root, "a.txt", b"payload");

    let mut config = test_config(&root);
    config.max_requests_per_connection = 2;
    let addr = spawn_server(config).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let get = b"GET /a.txt HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\n\r\n";

    stream.write_all(get).await.unwrap();
    let (status, headers, body) = read_response(&mut stream).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"payload");
    assert_eq!(header(&headers, "connection"), Some("keep-alive"));
    assert_eq!(header(&headers, "keep-alive"), Some("timeout=10, max=2"));

    stream.write_all(get).await.unwrap();
    let (status, _, body) = read_response(&mut stream).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"payload");

    // The cap is spent: the server closes without a client-initiated close.
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn traversal_cannot_escape_document_root() {
    // The secret sits right next to the docroot, one `..` away.
    let base = TempDir::new().unwrap();
    let webroot = base.path().join("webroot");
    std::fs::create_dir(&webroot).unwrap();
    std::fs::write(base.path().join("secret.txt"), b"do not serve").unwrap();

    let mut config: Config =
        serde_json::from_str(r#"{ "document_root": "/placeholder", "port": 0 }"#).unwrap();
    config.document_root = webroot;
    let addr = spawn_server(config).await;

    let (status, _, _) = request(
        addr,
        b"GET /../secret.txt HTTP/1.1\r\nHost: localhost\r\n\r\n",
    )
    .await;
    assert_eq!(status, 404);

    let (status, _, _) = request(
        addr,
        b"GET /%2e%2e/%2e%2e/secret.txt HTTP/1.1\r\nHost: localhost\r\n\r\n",
    )
    .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn directory_request_is_404() {
    let root = TempDir::new().unwrap();
    std::fs::create_dir(root.path().join("assets")).unwrap();
    write_file(&root, "a.txt", b"x");
    let addr = spawn_server(test_config(&root)).await;

    let (status, _, _) =
        request(addr, b"GET /assets HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn idle_connection_times_out_silently() {
    let root = TempDir::new().unwrap();
    let mut config = test_config(&root);
    config.timeout = 1;
    let addr = spawn_server(config).await;

    // Never send a byte: the deadline passes and the server closes without
    // emitting a response.
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn half_sent_request_times_out_with_400() {
    let root = TempDir::new().unwrap();
    let mut config = test_config(&root);
    config.timeout = 1;
    let addr = spawn_server(config).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GET /partial").await.unwrap();

    // Unlike the idle case, a half-sent head is reported before the close.
    let (status, headers, _) = read_response(&mut stream).await;
    assert_eq!(status, 400);
    assert_eq!(header(&headers, "connection"), Some("close"));
}

#[tokio::test]
async fn strong_etag_mode_revalidates_by_content() {
    let root = TempDir::new().unwrap();
    write_file(&root, "doc.txt", b"first version");

    let mut config = test_config(&root);
    config.use_strong_etag = true;
    let addr = spawn_server(config).await;

    let (_, headers, _) =
        request(addr, b"GET /doc.txt HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    let etag = header(&headers, "etag").unwrap().to_owned();
    assert!(etag.starts_with('"'), "strong tags carry no W/ prefix: {etag}");

    // Same content, same tag: revalidation succeeds.
    let revalidate =
        format!("GET /doc.txt HTTP/1.1\r\nHost: localhost\r\nIf-None-Match: {etag}\r\n\r\n");
    let (status, _, _) = request(addr, revalidate.as_bytes()).await;
    assert_eq!(status, 304);

    // Content changed: the old validator is stale.
    write_file(&root, "doc.txt", b"second version");
    let (status, _, body) = request(addr, revalidate.as_bytes()).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"second version");
}
