//! Tagged data model for one filesystem resolution outcome.
//!
//! A `ResolvedArtifact` is created once by the resolver and never mutated
//! afterwards; the cache hands out shared references to the same value for
//! every request that maps to the same filesystem path. Response behavior
//! (cache-control, compression, dynamic rendering) switches on the `kind`
//! tag rather than on separate handler types.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;

/// Matches names embedding a content hash: a dot-separated run of at least
/// 16 alphanumerics directly before a `.js`, `.mjs` or `.css` suffix.
static FINGERPRINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.[a-zA-Z0-9]{16,}\.(js|mjs|css)$").expect("fingerprint pattern"));

/// Whether a request path names a fingerprinted (immutably cacheable) asset.
pub fn is_fingerprinted(path: &str) -> bool {
    FINGERPRINT_RE.is_match(path)
}

/// Classification of a resolved request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// No file and no index fallback anywhere on the ancestor chain.
    NotFound,
    /// A regular file without a content hash in its name.
    Plain,
    /// A file whose name embeds a content hash; safe to cache long-term.
    Fingerprinted,
    /// An `index.html` entry serving the requested directory.
    Index,
    /// A contentless redirection to the cache entry owning the index payload.
    IndexProxy,
    /// The `/__version__` marker body.
    Version,
}

/// One filesystem outcome for a request, with opportunistically loaded
/// precompressed sidecar payloads.
#[derive(Debug, Clone)]
pub struct ResolvedArtifact {
    /// Canonical uncompressed file, empty for `NotFound`. For `IndexProxy`
    /// this is the path of the owning `index.html`; its parent directory is
    /// the cache key the proxy redirects to.
    pub source_path: PathBuf,
    pub kind: ArtifactKind,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub content_type: String,
    /// True only when both the `.br` and the `.gz` sidecar were readable.
    pub precompressed: bool,
    pub content: Option<Vec<u8>>,
    pub brotli: Option<Vec<u8>>,
    pub gzip: Option<Vec<u8>>,
}

impl ResolvedArtifact {
    pub fn not_found() -> Self {
        Self {
            source_path: PathBuf::new(),
            kind: ArtifactKind::NotFound,
            size: 0,
            modified: None,
            content_type: String::new(),
            precompressed: false,
            content: None,
            brotli: None,
            gzip: None,
        }
    }

    /// A proxy entry holds no content, only the owning index path.
    pub fn proxy(index_path: PathBuf) -> Self {
        Self {
            source_path: index_path,
            kind: ArtifactKind::IndexProxy,
            size: 0,
            modified: None,
            content_type: String::new(),
            precompressed: false,
            content: None,
            brotli: None,
            gzip: None,
        }
    }

    /// Cache key of the entry owning this proxy's content.
    pub fn proxy_target(&self) -> Option<&Path> {
        match self.kind {
            ArtifactKind::IndexProxy => self.source_path.parent(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ArtifactKind::NotFound
    }

    pub fn is_index(&self) -> bool {
        self.kind == ArtifactKind::Index
    }

    pub fn is_proxy(&self) -> bool {
        self.kind == ArtifactKind::IndexProxy
    }

    pub fn is_fingerprinted(&self) -> bool {
        self.kind == ArtifactKind::Fingerprinted
    }

    /// Raw payload; a read failure degrades to an empty body.
    pub fn content_bytes(&self) -> &[u8] {
        self.content.as_deref().unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_requires_long_hash_segment() {
        assert!(is_fingerprinted("/main.0123456789abcdef.js"));
        assert!(is_fingerprinted("/de/polyfills.a1b2c3d4e5f6a7b8c9d0.mjs"));
        assert!(is_fingerprinted("/styles.ABCDEF0123456789abcd.css"));
        // 15 characters is one short
        assert!(!is_fingerprinted("/main.0123456789abcde.js"));
        assert!(!is_fingerprinted("/main.js"));
        assert!(!is_fingerprinted("/index.html"));
        // hash must sit directly before the final extension
        assert!(!is_fingerprinted("/main.0123456789abcdef.js.map"));
    }

    #[test]
    fn proxy_target_is_owning_directory() {
        let proxy = ResolvedArtifact::proxy(PathBuf::from("/root/de/index.html"));
        assert!(proxy.is_proxy());
        assert_eq!(proxy.proxy_target(), Some(Path::new("/root/de")));
        assert!(proxy.content.is_none());

        let not_found = ResolvedArtifact::not_found();
        assert_eq!(not_found.proxy_target(), None);
    }

    #[test]
    fn content_bytes_degrades_to_empty() {
        let artifact = ResolvedArtifact::not_found();
        assert!(artifact.content_bytes().is_empty());
    }
}
