//! Content-Security-Policy rendering: per-request nonce, inline
//! script/style digests, template substitution.
//!
//! The placeholder spellings are a contract with the build tooling that
//! produced the HTML, so they live in `CspTokens` rather than being
//! hardcoded at the call sites.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use lol_html::{element, rewrite_str, text, RewriteStrSettings};
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use sha2::{Digest, Sha512};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

pub const NONCE_LENGTH: usize = 16;

const NONCE_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
/// Largest multiple of the alphabet size below 256, for unbiased rejection
/// sampling of single bytes.
const REJECTION_BOUND: usize = (256 / NONCE_ALPHABET.len()) * NONCE_ALPHABET.len();

/// Default policy template; the `*_SRC` placeholders are filled from the
/// server configuration, the nonce/hash placeholders per request.
pub const DEFAULT_TEMPLATE: &str = "default-src 'self' ${_CSP_DEFAULT_SRC}; \
     connect-src 'self' ${_CSP_CONNECT_SRC}; \
     font-src 'self' ${_CSP_FONT_SRC}; \
     img-src 'self' ${_CSP_IMG_SRC}; \
     script-src 'self' ${NGSS_CSP_NONCE} ${NGSS_CSP_SCRIPT_HASH} ${_CSP_SCRIPT_SRC}; \
     style-src 'self' ${NGSS_CSP_NONCE} ${NGSS_CSP_STYLE_HASH} ${_CSP_STYLE_SRC};";

/// Configurable placeholder spellings embedded in HTML templates and the
/// CSP template.
#[derive(Debug, Clone)]
pub struct CspTokens {
    /// Reserved config-state key holding the per-request nonce; the HTML
    /// placeholder is `${<nonce_key>}`.
    pub nonce_key: String,
    pub script_hash_placeholder: String,
    pub style_hash_placeholder: String,
}

impl Default for CspTokens {
    fn default() -> Self {
        Self {
            nonce_key: "NGSS_CSP_NONCE".to_owned(),
            script_hash_placeholder: "${NGSS_CSP_SCRIPT_HASH}".to_owned(),
            style_hash_placeholder: "${NGSS_CSP_STYLE_HASH}".to_owned(),
        }
    }
}

impl CspTokens {
    pub fn nonce_placeholder(&self) -> String {
        format!("${{{}}}", self.nonce_key)
    }

    pub fn wants_hashes(&self, template: &str) -> bool {
        template.contains(&self.script_hash_placeholder)
            || template.contains(&self.style_hash_placeholder)
    }
}

/// Operator-supplied additional source lists substituted into the template.
#[derive(Debug, Clone, Default)]
pub struct CspSources {
    pub default_src: String,
    pub connect_src: String,
    pub font_src: String,
    pub img_src: String,
    pub script_src: String,
    pub style_src: String,
}

/// Substitute all placeholders into the policy template.
pub fn build_header(
    template: &str,
    tokens: &CspTokens,
    nonce: &str,
    script_hashes: &[String],
    style_hashes: &[String],
    sources: &CspSources,
) -> String {
    let mut csp = template.replace(&tokens.nonce_placeholder(), &format!("'nonce-{nonce}'"));
    csp = csp.replace(&tokens.script_hash_placeholder, &script_hashes.join(" "));
    csp = csp.replace(&tokens.style_hash_placeholder, &style_hashes.join(" "));
    for (placeholder, value) in [
        ("${_CSP_DEFAULT_SRC}", &sources.default_src),
        ("${_CSP_CONNECT_SRC}", &sources.connect_src),
        ("${_CSP_FONT_SRC}", &sources.font_src),
        ("${_CSP_IMG_SRC}", &sources.img_src),
        ("${_CSP_SCRIPT_SRC}", &sources.script_src),
        ("${_CSP_STYLE_SRC}", &sources.style_src),
    ] {
        csp = csp.replace(placeholder, value);
    }
    csp
}

/// 16 alphanumeric characters from the OS entropy source. On entropy
/// failure falls back to a time-seeded generator with a warning; a request
/// is never failed for lack of secure randomness.
pub fn generate_nonce() -> String {
    match nonce_from_rng(&mut OsRng) {
        Ok(nonce) => nonce,
        Err(error) => {
            warn!(%error, "secure random unavailable for CSP nonce, falling back to time-seeded generator");
            let seed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or_default();
            let mut rng = StdRng::seed_from_u64(seed);
            // infallible source
            nonce_from_rng(&mut rng).unwrap_or_default()
        }
    }
}

/// Deterministic under an injected generator, which is what the tests use.
fn nonce_from_rng<R: RngCore>(rng: &mut R) -> Result<String, rand::Error> {
    let mut nonce = String::with_capacity(NONCE_LENGTH);
    let mut buf = [0u8; 64];
    while nonce.len() < NONCE_LENGTH {
        rng.try_fill_bytes(&mut buf)?;
        for &byte in buf.iter() {
            if (byte as usize) < REJECTION_BOUND {
                nonce.push(NONCE_ALPHABET[byte as usize % NONCE_ALPHABET.len()] as char);
                if nonce.len() == NONCE_LENGTH {
                    break;
                }
            }
        }
    }
    Ok(nonce)
}

/// CSP source token for one block of inline text.
pub fn sha512_token(text: &str) -> String {
    let digest = Sha512::digest(text.as_bytes());
    format!("'sha512-{}'", BASE64.encode(digest))
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ElementHashes {
    pub scripts: Vec<String>,
    pub styles: Vec<String>,
}

/// SHA-512 digests of every `<script>`/`<style>` element that has text
/// content and no `nonce` attribute, in document order.
pub fn collect_element_hashes(html: &str) -> Result<ElementHashes, crate::Error> {
    let script_hashes: Rc<RefCell<Vec<String>>> = Rc::default();
    let style_hashes: Rc<RefCell<Vec<String>>> = Rc::default();
    // Text of the element currently being collected; None while inside an
    // element carrying a nonce attribute.
    let script_buf: Rc<RefCell<Option<String>>> = Rc::default();
    let style_buf: Rc<RefCell<Option<String>>> = Rc::default();

    let handlers = vec![
        element!("script", {
            let buf = script_buf.clone();
            move |el| {
                *buf.borrow_mut() = el.get_attribute("nonce").is_none().then(String::new);
                Ok(())
            }
        }),
        text!("script", {
            let buf = script_buf.clone();
            let hashes = script_hashes.clone();
            move |chunk| {
                if let Some(text) = buf.borrow_mut().as_mut() {
                    text.push_str(chunk.as_str());
                }
                if chunk.last_in_text_node() {
                    if let Some(text) = buf.borrow_mut().take() {
                        if !text.is_empty() {
                            hashes.borrow_mut().push(sha512_token(&text));
                        }
                    }
                }
                Ok(())
            }
        }),
        element!("style", {
            let buf = style_buf.clone();
            move |el| {
                *buf.borrow_mut() = el.get_attribute("nonce").is_none().then(String::new);
                Ok(())
            }
        }),
        text!("style", {
            let buf = style_buf.clone();
            let hashes = style_hashes.clone();
            move |chunk| {
                if let Some(text) = buf.borrow_mut().as_mut() {
                    text.push_str(chunk.as_str());
                }
                if chunk.last_in_text_node() {
                    if let Some(text) = buf.borrow_mut().take() {
                        if !text.is_empty() {
                            hashes.borrow_mut().push(sha512_token(&text));
                        }
                    }
                }
                Ok(())
            }
        }),
    ];

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: handlers,
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|e| crate::Error::Html(e.to_string()))?;

    Ok(ElementHashes {
        scripts: Rc::try_unwrap(script_hashes).unwrap_or_default().into_inner(),
        styles: Rc::try_unwrap(style_hashes).unwrap_or_default().into_inner(),
    })
}
