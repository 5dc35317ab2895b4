//! One-shot brotli/gzip encoders.
//!
//! Request-time recompression of rendered HTML uses the fast presets; the
//! offline sidecar walker uses the best presets since it runs once before
//! the server starts.

use flate2::write::GzEncoder;
use flate2::Compression as GzipCompression;
use std::io::{self, Write};

const BROTLI_BUFFER: usize = 4096;
const BROTLI_WINDOW: u32 = 22;
const BROTLI_FAST_QUALITY: u32 = 5;
const BROTLI_BEST_QUALITY: u32 = 11;

pub fn brotli_fast(data: &[u8]) -> io::Result<Vec<u8>> {
    brotli_with_quality(data, BROTLI_FAST_QUALITY)
}

pub fn brotli_best(data: &[u8]) -> io::Result<Vec<u8>> {
    brotli_with_quality(data, BROTLI_BEST_QUALITY)
}

fn brotli_with_quality(data: &[u8], quality: u32) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut writer = brotli::CompressorWriter::new(&mut out, BROTLI_BUFFER, quality, BROTLI_WINDOW);
    writer.write_all(data)?;
    writer.flush()?;
    drop(writer);
    Ok(out)
}

pub fn gzip_fast(data: &[u8]) -> io::Result<Vec<u8>> {
    gzip_with_level(data, GzipCompression::fast())
}

pub fn gzip_best(data: &[u8]) -> io::Result<Vec<u8>> {
    gzip_with_level(data, GzipCompression::best())
}

fn gzip_with_level(data: &[u8], level: GzipCompression) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), level);
    encoder.write_all(data)?;
    encoder.finish()
}
