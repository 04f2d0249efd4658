//! ETag derivation.
//!
//! Entity tags are built from a 64-bit FNV-1a hash, formatted as lowercase
//! hex. Strong tags hash the full file content; weak tags hash the file's
//! mtime and path, which is O(1) but cannot distinguish two content versions
//! written within the same second.

use std::hash::Hasher;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use fnv::FnvHasher;

/// Hashes a byte blob with FNV-1a 64.
pub fn hash64(blob: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(blob);
    hasher.finish()
}

/// Strong ETag over the full file content: `"<hex>"`.
///
/// Changes whenever the content changes, including mtime-preserving edits.
pub fn strong(content: &[u8]) -> String {
    format!("\"{:x}\"", hash64(content))
}

/// Weak ETag over mtime + path: `W/"<hex>"`.
///
/// A content change within the mtime's one-second granularity produces the
/// same tag. That approximation is the point of weak tags; callers wanting
/// content accuracy use [`strong`].
pub fn weak(path: &Path, modified: SystemTime) -> String {
    let mtime_secs = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let seed = format!("{}-{}", mtime_secs, path.display());
    format!("W/\"{:x}\"", hash64(seed.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fnv1a_offset_basis() {
        // FNV-1a of the empty input is the offset basis.
        assert_eq!(hash64(b""), 0xcbf2_9ce4_8422_2325);
    }

    #[test]
    fn hash_is_deterministic_and_content_sensitive() {
        assert_eq!(hash64(b"hello"), hash64(b"hello"));
        assert_ne!(hash64(b"hello"), hash64(b"hello!"));
    }

    #[test]
    fn strong_tag_shape() {
        let tag = strong(b"<h1>hi</h1>");
        assert!(tag.starts_with('"') && tag.ends_with('"'));
        assert_eq!(tag, strong(b"<h1>hi</h1>"));
        assert_ne!(tag, strong(b"<h1>ho</h1>"));
    }

    #[test]
    fn weak_tag_shape() {
        let mtime = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let tag = weak(Path::new("/srv/www/index.html"), mtime);
        assert!(tag.starts_with("W/\"") && tag.ends_with('"'));
    }

    #[test]
    fn weak_tag_tracks_mtime_and_path() {
        let mtime = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let path = Path::new("/srv/www/index.html");
        assert_eq!(weak(path, mtime), weak(path, mtime));
        assert_ne!(weak(path, mtime), weak(path, mtime + Duration::from_secs(1)));
        assert_ne!(weak(path, mtime), weak(Path::new("/srv/www/other.html"), mtime));
    }

    #[test]
    fn weak_tag_ignores_subsecond_mtime() {
        let mtime = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let path = Path::new("/srv/www/index.html");
        assert_eq!(weak(path, mtime), weak(path, mtime + Duration::from_millis(500)));
    }
}
