//! Request-path to filesystem artifact resolution, backed by a bounded
//! shared cache.
//!
//! Resolution never fails a request: filesystem errors degrade to
//! `NotFound` or to absent content fields. Negative results are cached so
//! repeated misses for the same bad path do not re-walk the filesystem.
//! Every sub-path falling through to the same locale index shares one
//! cached payload via a contentless proxy entry.

use crate::cache::TwoQueueCache;
use domain::{artifact, ArtifactKind, ResolvedArtifact};
use parking_lot::Mutex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

pub const VERSION_ROUTE: &str = "/__version__";
const VERSION_FILE: &str = "version.json";
const VERSION_PLACEHOLDER: &[u8] =
    b"{\n  \"undefined\": \"app does not have a version.json file\"\n}";
const INDEX_NAME: &str = "index.html";

pub struct ArtifactResolver {
    root: PathBuf,
    /// Directories containing an `index.html`, relative to the root with
    /// `/` separators (`.` for the root itself). Collected once at startup.
    index_dirs: Vec<String>,
    cache: Mutex<TwoQueueCache<PathBuf, Arc<ResolvedArtifact>>>,
}

impl ArtifactResolver {
    pub fn new(root: PathBuf, cache_capacity: usize) -> Self {
        let index_dirs = find_index_dirs(&root);
        debug!(?index_dirs, "discovered index-bearing directories");
        Self {
            root,
            index_dirs,
            cache: Mutex::new(TwoQueueCache::new(cache_capacity)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_dirs(&self) -> &[String] {
        &self.index_dirs
    }

    /// Resolve a request path to an artifact, from cache when possible.
    pub fn resolve(&self, request_path: &str) -> Arc<ResolvedArtifact> {
        let key = self.normalize(request_path);

        {
            let mut cache = self.cache.lock();
            if let Some(entry) = cache.get(&key) {
                match entry.proxy_target() {
                    None => return entry,
                    Some(target) => {
                        let target = target.to_path_buf();
                        if let Some(owner) = cache.get(&target) {
                            return owner;
                        }
                        // owning entry was evicted; rebuild below
                    }
                }
            }
        }

        if request_path == VERSION_ROUTE {
            return self.resolve_version(key);
        }
        if file_exists(&key) {
            return self.resolve_file(key, request_path);
        }
        match self.nearest_index(&key) {
            Some((index_path, in_requested_dir)) => {
                self.resolve_index(key, index_path, in_requested_dir)
            }
            None => {
                debug!(path = %key.display(), "no file and no index fallback");
                let entry = Arc::new(ResolvedArtifact::not_found());
                self.cache.lock().put(key, entry.clone());
                entry
            }
        }
    }

    /// Best index-bearing directory for an ordered preference list: exact
    /// match first, then prefix match in either direction, then the first
    /// discovered directory. `None` only when no index directory exists.
    pub fn match_locale(&self, preferences: &[String]) -> Option<String> {
        if self.index_dirs.is_empty() {
            return None;
        }
        let preferences: Vec<&str> = preferences
            .iter()
            .map(|p| strip_quality(p))
            .filter(|p| !p.is_empty())
            .collect();

        for preference in &preferences {
            for dir in &self.index_dirs {
                if *preference == dir.as_str() {
                    return Some(dir.clone());
                }
            }
        }
        for preference in &preferences {
            for dir in &self.index_dirs {
                if dir.starts_with(preference) || preference.starts_with(dir.as_str()) {
                    return Some(dir.clone());
                }
            }
        }
        self.index_dirs.first().cloned()
    }

    /// Join the request path under the root, resolving `.`/`..` segments
    /// lexically and never above the root.
    fn normalize(&self, request_path: &str) -> PathBuf {
        let mut out = self.root.clone();
        let mut depth = 0usize;
        for segment in request_path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if depth > 0 {
                        out.pop();
                        depth -= 1;
                    }
                }
                segment => {
                    out.push(segment);
                    depth += 1;
                }
            }
        }
        out
    }

    fn resolve_version(&self, key: PathBuf) -> Arc<ResolvedArtifact> {
        let version_path = self.root.join(VERSION_FILE);
        let (_, modified, content_type) = file_meta(&version_path);
        let content = read_optional(&version_path)
            .unwrap_or_else(|| VERSION_PLACEHOLDER.to_vec());
        let entry = Arc::new(ResolvedArtifact {
            source_path: version_path,
            kind: ArtifactKind::Version,
            size: content.len() as u64,
            modified,
            content_type,
            precompressed: false,
            content: Some(content),
            brotli: None,
            gzip: None,
        });
        self.cache.lock().put(key, entry.clone());
        entry
    }

    fn resolve_file(&self, key: PathBuf, request_path: &str) -> Arc<ResolvedArtifact> {
        let kind = if artifact::is_fingerprinted(request_path) {
            ArtifactKind::Fingerprinted
        } else {
            ArtifactKind::Plain
        };
        let (size, modified, content_type) = file_meta(&key);
        let brotli = read_optional(&sidecar_path(&key, "br"));
        let gzip = read_optional(&sidecar_path(&key, "gz"));
        let entry = Arc::new(ResolvedArtifact {
            source_path: key.clone(),
            kind,
            size,
            modified,
            content_type,
            precompressed: brotli.is_some() && gzip.is_some(),
            content: read_content(&key),
            brotli,
            gzip,
        });
        self.cache.lock().put(key, entry.clone());
        entry
    }

    fn resolve_index(
        &self,
        key: PathBuf,
        index_path: PathBuf,
        in_requested_dir: bool,
    ) -> Arc<ResolvedArtifact> {
        if in_requested_dir {
            let entry = Arc::new(self.load_index(&index_path));
            self.cache.lock().put(key, entry.clone());
            return entry;
        }

        let Some(dir_key) = index_path.parent().map(Path::to_path_buf) else {
            let entry = Arc::new(ResolvedArtifact::not_found());
            self.cache.lock().put(key, entry.clone());
            return entry;
        };

        {
            let mut cache = self.cache.lock();
            if let Some(owner) = cache.get(&dir_key) {
                cache.put(key, Arc::new(ResolvedArtifact::proxy(index_path)));
                return owner;
            }
        }

        let entry = Arc::new(self.load_index(&index_path));
        let mut cache = self.cache.lock();
        cache.put(key, Arc::new(ResolvedArtifact::proxy(index_path)));
        cache.put(dir_key, entry.clone());
        entry
    }

    /// Walk upward from the normalized path toward the root, returning the
    /// first `index.html` and whether it serves the requested directory
    /// itself (as opposed to an ancestor).
    fn nearest_index(&self, normalized: &Path) -> Option<(PathBuf, bool)> {
        if self.index_dirs.is_empty() {
            return None;
        }
        let mut dir = normalized.to_path_buf();
        loop {
            let candidate = dir.join(INDEX_NAME);
            if file_exists(&candidate) {
                let in_requested_dir = dir == normalized;
                return Some((candidate, in_requested_dir));
            }
            if dir == self.root || !dir.pop() {
                return None;
            }
        }
    }

    fn load_index(&self, index_path: &Path) -> ResolvedArtifact {
        let (size, modified, content_type) = file_meta(index_path);
        let brotli = read_optional(&sidecar_path(index_path, "br"));
        let gzip = read_optional(&sidecar_path(index_path, "gz"));
        ResolvedArtifact {
            source_path: index_path.to_path_buf(),
            kind: ArtifactKind::Index,
            size,
            modified,
            content_type,
            precompressed: brotli.is_some() && gzip.is_some(),
            content: read_content(index_path),
            brotli,
            gzip,
        }
    }
}

fn find_index_dirs(root: &Path) -> Vec<String> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        match entry {
            Ok(entry) if entry.file_type().is_file() && entry.file_name() == INDEX_NAME => {
                let dir = entry.path().parent().unwrap_or(root);
                let rel = dir.strip_prefix(root).unwrap_or(dir);
                if rel.as_os_str().is_empty() {
                    dirs.push(".".to_owned());
                } else {
                    dirs.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
            Ok(_) => {}
            Err(error) => {
                warn!(%error, root = %root.display(), "failed to walk asset root for index files")
            }
        }
    }
    dirs
}

fn strip_quality(preference: &str) -> &str {
    preference.split(';').next().unwrap_or("").trim()
}

fn file_exists(path: &Path) -> bool {
    path.is_file()
}

fn sidecar_path(path: &Path, extension: &str) -> PathBuf {
    let mut os: OsString = path.as_os_str().to_owned();
    os.push(".");
    os.push(extension);
    PathBuf::from(os)
}

fn file_meta(path: &Path) -> (u64, Option<SystemTime>, String) {
    let content_type = mime_guess::from_path(path)
        .first()
        .map(|mime| mime.to_string())
        .unwrap_or_default();
    match std::fs::metadata(path) {
        Ok(meta) => (meta.len(), meta.modified().ok(), content_type),
        Err(_) => (0, None, content_type),
    }
}

/// Canonical content; a failure is logged and degrades to `None`.
fn read_content(path: &Path) -> Option<Vec<u8>> {
    match std::fs::read(path) {
        Ok(content) => Some(content),
        Err(error) => {
            error!(path = %path.display(), %error, "failed to read file");
            None
        }
    }
}

/// Sidecars and `version.json` are optional; a miss is routine and only
/// debug-logged.
fn read_optional(path: &Path) -> Option<Vec<u8>> {
    match std::fs::read(path) {
        Ok(content) => Some(content),
        Err(error) => {
            debug!(path = %path.display(), %error, "no readable file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Root index + one locale index + a fingerprinted asset with sidecars.
    fn spa_fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "index.html", "<html>root</html>");
        write(root, "de/index.html", "<html>de</html>");
        write(root, "de/main.0123456789abcdef.js", "console.log('de')");
        write(root, "de/main.0123456789abcdef.js.br", "brotli-bytes");
        write(root, "de/main.0123456789abcdef.js.gz", "gzip-bytes");
        write(root, "styles.css", "body{}");
        write(root, "styles.css.br", "br-only");
        dir
    }

    fn resolver(dir: &TempDir) -> ArtifactResolver {
        ArtifactResolver::new(dir.path().to_path_buf(), 64)
    }

    #[test]
    fn exact_file_with_sidecar_pair() {
        let dir = spa_fixture();
        let resolver = resolver(&dir);

        let artifact = resolver.resolve("/de/main.0123456789abcdef.js");
        assert_eq!(artifact.kind, ArtifactKind::Fingerprinted);
        assert!(artifact.precompressed);
        assert_eq!(artifact.content.as_deref(), Some(b"console.log('de')".as_ref()));
        assert_eq!(artifact.brotli.as_deref(), Some(b"brotli-bytes".as_ref()));
        assert_eq!(artifact.gzip.as_deref(), Some(b"gzip-bytes".as_ref()));
        assert!(artifact.content_type.contains("javascript"));
    }

    #[test]
    fn lone_sidecar_is_not_trusted() {
        let dir = spa_fixture();
        let artifact = resolver(&dir).resolve("/styles.css");
        assert_eq!(artifact.kind, ArtifactKind::Plain);
        assert!(!artifact.precompressed);
        assert!(artifact.brotli.is_some());
        assert!(artifact.gzip.is_none());
    }

    #[test]
    fn index_fallback_picks_nearest_ancestor() {
        let dir = spa_fixture();
        let resolver = resolver(&dir);

        let nested = resolver.resolve("/de/deep/path");
        assert_eq!(nested.kind, ArtifactKind::Index);
        assert_eq!(nested.content.as_deref(), Some(b"<html>de</html>".as_ref()));

        let other = resolver.resolve("/other/path");
        assert_eq!(other.content.as_deref(), Some(b"<html>root</html>".as_ref()));
    }

    #[test]
    fn request_for_the_index_directory_itself_is_direct() {
        let dir = spa_fixture();
        let resolver = resolver(&dir);
        let artifact = resolver.resolve("/de/");
        assert_eq!(artifact.kind, ArtifactKind::Index);
        assert!(!artifact.is_proxy());
    }

    #[test]
    fn resolution_is_idempotent_and_cached() {
        let dir = spa_fixture();
        let resolver = resolver(&dir);

        let first = resolver.resolve("/de/main.0123456789abcdef.js");
        // Removing the file proves the second resolution never touches disk.
        fs::remove_file(dir.path().join("de/main.0123456789abcdef.js")).unwrap();
        let second = resolver.resolve("/de/main.0123456789abcdef.js");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.content, second.content);
    }

    #[test]
    fn sub_paths_share_one_index_payload() {
        let dir = spa_fixture();
        let resolver = resolver(&dir);

        let a = resolver.resolve("/de/settings");
        let b = resolver.resolve("/de/settings/profile");
        assert!(Arc::ptr_eq(&a, &b), "both sub-paths must reference one payload");
        assert_eq!(a.kind, ArtifactKind::Index);
    }

    #[test]
    fn negative_results_are_cached() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "present.txt", "x");
        let resolver = ArtifactResolver::new(dir.path().to_path_buf(), 64);

        assert!(resolver.resolve("/missing.txt").is_not_found());
        // File appearing later is not picked up; entries live for the
        // process lifetime.
        write(dir.path(), "missing.txt", "late");
        assert!(resolver.resolve("/missing.txt").is_not_found());
    }

    #[test]
    fn traversal_segments_cannot_escape_the_root() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "file.txt", "x");
        let resolver = ArtifactResolver::new(dir.path().to_path_buf(), 64);

        assert!(resolver.resolve("/../../etc/passwd").is_not_found());
        let inside = resolver.resolve("/sub/../file.txt");
        assert_eq!(inside.kind, ArtifactKind::Plain);
    }

    #[test]
    fn version_route_prefers_version_json() {
        let dir = spa_fixture();
        write(dir.path(), "version.json", r#"{"version": "1.2.3"}"#);
        let artifact = resolver(&dir).resolve("/__version__");
        assert_eq!(artifact.kind, ArtifactKind::Version);
        assert_eq!(artifact.content.as_deref(), Some(br#"{"version": "1.2.3"}"#.as_ref()));
        assert_eq!(artifact.content_type, "application/json");
    }

    #[test]
    fn version_route_synthesizes_placeholder() {
        let dir = spa_fixture();
        let artifact = resolver(&dir).resolve("/__version__");
        assert_eq!(artifact.kind, ArtifactKind::Version);
        let body = artifact.content.as_deref().unwrap();
        assert!(std::str::from_utf8(body).unwrap().contains("does not have a version.json"));
        assert_eq!(artifact.size, body.len() as u64);
    }

    #[test]
    fn unreadable_index_degrades_to_empty_content() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "ghost/index.html", "x");
        let resolver = ArtifactResolver::new(dir.path().to_path_buf(), 64);
        fs::remove_file(dir.path().join("ghost/index.html")).unwrap();

        // No index anywhere now, so the walk yields NotFound rather than an
        // error surfacing to the caller.
        assert!(resolver.resolve("/ghost/page").is_not_found());
    }

    #[test]
    fn locale_matching_prefers_exact_then_prefix() {
        let dir = TempDir::new().unwrap();
        for locale in ["de-CH", "en-US", "fr"] {
            write(dir.path(), &format!("{locale}/index.html"), locale);
        }
        let resolver = ArtifactResolver::new(dir.path().to_path_buf(), 64);

        let prefs = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert_eq!(resolver.match_locale(&prefs(&["fr", "en"])), Some("fr".to_owned()));
        assert_eq!(resolver.match_locale(&prefs(&["en"])), Some("en-US".to_owned()));
        assert_eq!(resolver.match_locale(&prefs(&["en-US-x-private"])), Some("en-US".to_owned()));
        // no preference matches anything: first discovered wins
        assert_eq!(resolver.match_locale(&prefs(&["ja"])), Some("de-CH".to_owned()));
        assert_eq!(resolver.match_locale(&[]), Some("de-CH".to_owned()));
    }

    #[test]
    fn locale_matching_strips_quality_parameters() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "en/index.html", "en");
        let resolver = ArtifactResolver::new(dir.path().to_path_buf(), 64);
        let prefs = vec![" en ; q=0.9".to_owned()];
        assert_eq!(resolver.match_locale(&prefs), Some("en".to_owned()));
    }

    #[test]
    fn locale_matching_without_indexes_is_none() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "plain.txt", "x");
        let resolver = ArtifactResolver::new(dir.path().to_path_buf(), 64);
        assert_eq!(resolver.match_locale(&["en".to_owned()]), None);
    }
}
