//! Artifact resolution, caching and response rendering for single-page
//! application bundles. The HTTP surface lives in the edge crate; this
//! crate is synchronous and side-effect free apart from filesystem reads.

pub mod cache;
pub mod compress;
pub mod csp;
pub mod dotenv;
pub mod encoding;
pub mod manifest;
pub mod render;
pub mod resolver;
pub mod state;

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTML rewrite error: {0}")]
    Html(String),
}
