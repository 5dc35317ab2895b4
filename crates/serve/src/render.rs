//! Response assembly: cache policy, content negotiation and dynamic HTML
//! rendering.
//!
//! Static artifacts are served from their cached payloads, preferring the
//! precompressed sidecars when the client accepts them. Index documents are
//! rendered per request: environment values are injected as an IIFE and,
//! when a policy template is configured, a fresh nonce and inline-element
//! hashes are substituted into the `Content-Security-Policy` header.

use crate::compress;
use crate::csp::{self, CspSources, CspTokens, ElementHashes};
use crate::encoding::AcceptEncoding;
use domain::{AppEnv, ArtifactKind, ResolvedArtifact};
use http::header::{
    HeaderName, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_SECURITY_POLICY, CONTENT_TYPE, VARY,
    X_FRAME_OPTIONS,
};
use std::time::SystemTime;
use tracing::warn;

const NO_CACHE: &str = "no-cache";
const NO_STORE: &str = "no-store";

/// Operator-tunable knobs shared by every response.
#[derive(Debug, Clone)]
pub struct RenderParams {
    /// Bodies below this many bytes are never served compressed.
    pub compression_threshold: u64,
    /// `max-age` seconds for fingerprinted assets; `0` downgrades them to
    /// `no-cache`.
    pub cache_max_age: u64,
    /// `Content-Security-Policy` template; empty disables the header.
    pub csp_template: String,
    pub csp_tokens: CspTokens,
    pub csp_sources: CspSources,
    /// `X-Frame-Options` value for HTML responses; empty disables it.
    pub x_frame_options: String,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            compression_threshold: 1024,
            cache_max_age: 31_536_000,
            csp_template: csp::DEFAULT_TEMPLATE.to_owned(),
            csp_tokens: CspTokens::default(),
            csp_sources: CspSources::default(),
            x_frame_options: "DENY".to_owned(),
        }
    }
}

/// A fully assembled response body with its headers.
#[derive(Debug)]
pub struct Rendered {
    pub body: Vec<u8>,
    pub headers: Vec<(HeaderName, String)>,
    pub modified: Option<SystemTime>,
}

pub fn render(
    artifact: &ResolvedArtifact,
    accept: &AcceptEncoding,
    params: &RenderParams,
    env: &AppEnv,
) -> Rendered {
    match artifact.kind {
        ArtifactKind::Index => render_index(artifact, accept, params, env),
        ArtifactKind::Version => Rendered {
            body: artifact.content_bytes().to_vec(),
            headers: vec![
                (CONTENT_TYPE, content_type_or(artifact, "application/json")),
                (CACHE_CONTROL, NO_CACHE.to_owned()),
            ],
            modified: artifact.modified,
        },
        _ => render_static(artifact, accept, params),
    }
}

fn render_static(
    artifact: &ResolvedArtifact,
    accept: &AcceptEncoding,
    params: &RenderParams,
) -> Rendered {
    let cache_control = if artifact.is_fingerprinted() && params.cache_max_age > 0 {
        format!("max-age={}", params.cache_max_age)
    } else {
        NO_CACHE.to_owned()
    };

    let mut headers = Vec::with_capacity(4);
    if !artifact.content_type.is_empty() {
        headers.push((CONTENT_TYPE, artifact.content_type.clone()));
    }
    headers.push((CACHE_CONTROL, cache_control));
    if artifact.precompressed {
        headers.push((VARY, "Accept-Encoding".to_owned()));
    }

    let (body, encoding) = negotiate(artifact, accept, params.compression_threshold);
    if let Some(encoding) = encoding {
        headers.push((CONTENT_ENCODING, encoding.to_owned()));
    }

    Rendered {
        body,
        headers,
        modified: artifact.modified,
    }
}

fn render_index(
    artifact: &ResolvedArtifact,
    accept: &AcceptEncoding,
    params: &RenderParams,
    env: &AppEnv,
) -> Rendered {
    let mut headers = Vec::with_capacity(6);
    headers.push((CONTENT_TYPE, content_type_or(artifact, "text/html")));
    // Nonces make every index body single-use.
    headers.push((CACHE_CONTROL, NO_STORE.to_owned()));
    headers.push((VARY, "Accept-Encoding".to_owned()));
    if !params.x_frame_options.is_empty() {
        headers.push((X_FRAME_OPTIONS, params.x_frame_options.clone()));
    }

    let raw = String::from_utf8_lossy(artifact.content_bytes());
    let csp_applies = !params.csp_template.is_empty()
        && (raw.contains(&params.csp_tokens.nonce_placeholder())
            || env.has(&params.csp_tokens.nonce_key));

    if !csp_applies && env.is_empty() {
        // Nothing to inject: the precompressed sidecar can go out verbatim.
        let (body, encoding) = negotiate(artifact, accept, params.compression_threshold);
        if let Some(encoding) = encoding {
            headers.push((CONTENT_ENCODING, encoding.to_owned()));
        }
        return Rendered {
            body,
            headers,
            modified: artifact.modified,
        };
    }

    let mut env = env.clone();
    let html = if csp_applies {
        let nonce = csp::generate_nonce();
        env.update(&params.csp_tokens.nonce_key, &nonce);

        let element_hashes = if params.csp_tokens.wants_hashes(&params.csp_template) {
            match csp::collect_element_hashes(&raw) {
                Ok(hashes) => hashes,
                Err(error) => {
                    warn!(%error, "failed to hash inline elements, substituting empty hash lists");
                    ElementHashes::default()
                }
            }
        } else {
            ElementHashes::default()
        };

        let (html, iife_hash) = env.insert(&raw, true);
        let mut script_hashes = element_hashes.scripts;
        if let Some(hash) = iife_hash {
            script_hashes.push(hash);
        }

        headers.push((
            CONTENT_SECURITY_POLICY,
            csp::build_header(
                &params.csp_template,
                &params.csp_tokens,
                &nonce,
                &script_hashes,
                &element_hashes.styles,
                &params.csp_sources,
            ),
        ));
        // Placeholders in the markup itself take the raw nonce value.
        html.replace(&params.csp_tokens.nonce_placeholder(), &nonce)
    } else {
        let (html, _) = env.insert(&raw, false);
        html
    };

    let bytes = html.into_bytes();
    let (body, encoding) = recompress(bytes, accept, params.compression_threshold);
    if let Some(encoding) = encoding {
        headers.push((CONTENT_ENCODING, encoding.to_owned()));
    }

    Rendered {
        body,
        headers,
        modified: Some(SystemTime::from(env.last_changed)),
    }
}

/// Pick the best precompressed payload the client accepts, or the identity
/// body when the artifact is too small or sidecars are missing.
fn negotiate(
    artifact: &ResolvedArtifact,
    accept: &AcceptEncoding,
    threshold: u64,
) -> (Vec<u8>, Option<&'static str>) {
    if artifact.precompressed && artifact.size >= threshold {
        if accept.allows_brotli() {
            if let Some(brotli) = &artifact.brotli {
                return (brotli.clone(), Some("br"));
            }
        }
        if accept.allows_gzip() {
            if let Some(gzip) = &artifact.gzip {
                return (gzip.clone(), Some("gzip"));
            }
        }
    }
    (artifact.content_bytes().to_vec(), None)
}

/// Compress a freshly rendered body on the fly with the fast presets. A
/// compressor failure degrades to the identity body.
fn recompress(
    bytes: Vec<u8>,
    accept: &AcceptEncoding,
    threshold: u64,
) -> (Vec<u8>, Option<&'static str>) {
    if (bytes.len() as u64) < threshold {
        return (bytes, None);
    }
    if accept.allows_brotli() {
        match compress::brotli_fast(&bytes) {
            Ok(compressed) => return (compressed, Some("br")),
            Err(error) => warn!(%error, "brotli compression failed, sending identity body"),
        }
    } else if accept.allows_gzip() {
        match compress::gzip_fast(&bytes) {
            Ok(compressed) => return (compressed, Some("gzip")),
            Err(error) => warn!(%error, "gzip compression failed, sending identity body"),
        }
    }
    (bytes, None)
}

fn content_type_or(artifact: &ResolvedArtifact, fallback: &str) -> String {
    if artifact.content_type.is_empty() {
        fallback.to_owned()
    } else {
        artifact.content_type.clone()
    }
}
