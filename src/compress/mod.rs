//! gzip content-coding.
//!
//! The session treats compression as an opaque `bytes -> bytes` step; a
//! failure here is non-fatal and the caller falls back to the identity body.

use std::io::{self, Write};

use flate2::Compression;
use flate2::write::GzEncoder;

/// Compresses `data` with gzip at the default level.
pub fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(data.len() / 2 + 64),
        Compression::default(),
    );
    encoder.write_all(data)?;
    encoder.finish()
}
