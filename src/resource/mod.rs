//! Resource resolution.
//!
//! Maps a normalized request path to filesystem metadata under the document
//! root and derives the content type and ETag. Resolution is recomputed for
//! every request; there is no metadata cache.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;

use crate::config::Config;
use crate::etag;

/// Errors produced while resolving a request path.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("resource not found")]
    NotFound,

    #[error("permission denied")]
    PermissionDenied,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Filesystem metadata for one resolved request path.
#[derive(Debug)]
pub struct ResourceInfo {
    /// document root + normalized request path.
    pub local_file_path: PathBuf,
    pub content_type: String,
    /// `"<hex>"` (strong) or `W/"<hex>"` (weak), stable for an unchanged file.
    pub etag: String,
    pub last_modified: SystemTime,
    pub is_directory: bool,
    pub is_file: bool,
    pub file_size: u64,
    pub is_readable: bool,
    pub is_writable: bool,
    pub is_executable: bool,
}

/// Resolves a normalized request path against the document root.
///
/// The join re-checks containment under the root even though the parser has
/// already normalized the path; a path that would escape answers
/// [`ResolveError::NotFound`]. Stat failures map by [`io::ErrorKind`].
///
/// In strong-ETag mode the full file content is read and hashed (O(file
/// size)); weak mode hashes mtime + path and never touches the content.
pub async fn resolve(path: &str, config: &Config) -> Result<ResourceInfo, ResolveError> {
    let local_file_path =
        join_under_root(&config.document_root, path).ok_or(ResolveError::NotFound)?;

    let meta = tokio::fs::metadata(&local_file_path)
        .await
        .map_err(classify_io)?;
    let last_modified = meta.modified()?;

    let etag = if config.use_strong_etag {
        let content = tokio::fs::read(&local_file_path)
            .await
            .map_err(classify_io)?;
        etag::strong(&content)
    } else {
        etag::weak(&local_file_path, last_modified)
    };

    let (is_readable, is_writable, is_executable) = mode_flags(&meta);

    Ok(ResourceInfo {
        content_type: content_type_for(&local_file_path),
        etag,
        last_modified,
        is_directory: meta.is_dir(),
        is_file: meta.is_file(),
        file_size: meta.len(),
        is_readable,
        is_writable,
        is_executable,
        local_file_path,
    })
}

/// Content type by file extension.
///
/// Unknown extensions are reported as `application/octet-stream`; that
/// default is part of the server's contract and does not change between
/// releases.
fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path).first_or_octet_stream().to_string()
}

/// Joins the request path under the root, refusing any component that would
/// step outside it. The parser already collapses `..`, so a rejection here
/// means the caller bypassed parsing.
fn join_under_root(root: &Path, request_path: &str) -> Option<PathBuf> {
    let mut local = root.to_path_buf();
    for component in Path::new(request_path).components() {
        match component {
            Component::Normal(segment) => local.push(segment),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(local)
}

fn classify_io(err: io::Error) -> ResolveError {
    match err.kind() {
        io::ErrorKind::NotFound => ResolveError::NotFound,
        io::ErrorKind::PermissionDenied => ResolveError::PermissionDenied,
        _ => ResolveError::Io(err),
    }
}

#[cfg(unix)]
fn mode_flags(meta: &std::fs::Metadata) -> (bool, bool, bool) {
    use std::os::unix::fs::PermissionsExt;
    let mode = meta.permissions().mode();
    (mode & 0o400 != 0, mode & 0o200 != 0, mode & 0o111 != 0)
}

#[cfg(not(unix))]
fn mode_flags(meta: &std::fs::Metadata) -> (bool, bool, bool) {
    (true, !meta.permissions().readonly(), false)
}
