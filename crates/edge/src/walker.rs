//! Offline pre-compression of a bundle directory.
//!
//! Writes `.br` and `.gz` siblings at the best quality settings so the
//! server can serve them verbatim. Binary files, already-compressed
//! siblings and small files are left alone. Every failure is counted and
//! logged but never aborts the walk.

use serve::compress;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Default)]
pub struct CompressSummary {
    pub compressed: u64,
    pub skipped_small: u64,
    pub skipped_binary: u64,
    pub failed: u64,
}

pub fn compress_bundle(root: &Path, threshold: u64) -> CompressSummary {
    let mut summary = CompressSummary::default();
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!(%error, "failed to walk bundle entry");
                summary.failed += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if matches!(
            path.extension().and_then(OsStr::to_str),
            Some("br") | Some("gz")
        ) {
            continue;
        }
        match entry.metadata() {
            Ok(meta) if meta.len() < threshold => {
                debug!(path = %path.display(), "below compression threshold");
                summary.skipped_small += 1;
                continue;
            }
            Ok(_) => {}
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to stat bundle file");
                summary.failed += 1;
                continue;
            }
        }

        let content = match fs::read(path) {
            Ok(content) => content,
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to read bundle file");
                summary.failed += 1;
                continue;
            }
        };
        if !looks_like_text(&content) {
            debug!(path = %path.display(), "binary file left uncompressed");
            summary.skipped_binary += 1;
            continue;
        }

        match write_siblings(path, &content) {
            Ok(()) => summary.compressed += 1,
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to write compressed siblings");
                summary.failed += 1;
            }
        }
    }
    summary
}

fn write_siblings(path: &Path, content: &[u8]) -> std::io::Result<()> {
    fs::write(sibling_path(path, "br"), compress::brotli_best(content)?)?;
    fs::write(sibling_path(path, "gz"), compress::gzip_best(content)?)?;
    Ok(())
}

fn sibling_path(path: &Path, extension: &str) -> PathBuf {
    let mut os: OsString = path.as_os_str().to_owned();
    os.push(".");
    os.push(extension);
    PathBuf::from(os)
}

/// Compressing already-compressed binary formats wastes space; a file
/// whose first line is not valid UTF-8 is treated as binary.
fn looks_like_text(content: &[u8]) -> bool {
    let first_line = content.split(|byte| *byte == b'\n').next().unwrap_or(&[]);
    std::str::from_utf8(first_line).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn text_files_gain_decodable_siblings() {
        let dir = TempDir::new().unwrap();
        let payload = "var data = 'x';\n".repeat(200);
        fs::write(dir.path().join("main.js"), &payload).unwrap();

        let summary = compress_bundle(dir.path(), 1024);
        assert_eq!(summary.compressed, 1);

        let brotli_bytes = fs::read(dir.path().join("main.js.br")).unwrap();
        let mut decoded = Vec::new();
        brotli::Decompressor::new(brotli_bytes.as_slice(), 4096)
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, payload.as_bytes());

        let gzip_bytes = fs::read(dir.path().join("main.js.gz")).unwrap();
        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(gzip_bytes.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, payload.as_bytes());
    }

    #[test]
    fn small_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("tiny.js"), "let x;").unwrap();

        let summary = compress_bundle(dir.path(), 1024);
        assert_eq!(summary.compressed, 0);
        assert_eq!(summary.skipped_small, 1);
        assert!(!dir.path().join("tiny.js.br").exists());
    }

    #[test]
    fn binary_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut payload = vec![0xff, 0xfe, 0x00, 0x01];
        payload.extend(std::iter::repeat(0x80).take(2048));
        fs::write(dir.path().join("font.woff2"), &payload).unwrap();

        let summary = compress_bundle(dir.path(), 1024);
        assert_eq!(summary.compressed, 0);
        assert_eq!(summary.skipped_binary, 1);
        assert!(!dir.path().join("font.woff2.br").exists());
    }

    #[test]
    fn existing_siblings_are_not_recompressed() {
        let dir = TempDir::new().unwrap();
        let payload = "x".repeat(2048);
        fs::write(dir.path().join("app.css"), &payload).unwrap();
        fs::write(dir.path().join("stale.br"), &payload).unwrap();

        let summary = compress_bundle(dir.path(), 1024);
        assert_eq!(summary.compressed, 1);
        assert!(!dir.path().join("stale.br.br").exists());
        assert!(!dir.path().join("stale.br.gz").exists());
    }
}
