//! # staticd
//!
//! An async HTTP/1.1 static-file server written in Rust.
//!
//! Given a request path, staticd resolves it to a file under a configured
//! document root, applies conditional-request (ETag / `If-None-Match`) and
//! content-negotiation (gzip) logic, and serves the result over a persistent
//! keep-alive connection with idle timeouts and a per-connection request cap.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use staticd::{Config, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("staticd.json")?;
//!     let server = Server::bind(config).await?;
//!     println!("Listening on http://{}", server.local_addr());
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod compress;
pub mod config;
pub mod etag;
pub mod http;
pub mod resource;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::Config;
pub use http::{Headers, Request, Response, StatusCode};
pub use server::{Server, ServerError};
