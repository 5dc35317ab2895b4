//! Shared request state and the catch-all bundle handler.
//!
//! Resolution and rendering are synchronous and may touch the filesystem,
//! so each request is pushed onto the blocking pool. The handler never
//! errors: every outcome maps to a response.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use chrono::{DateTime, Utc};
use http::header::{
    ACCEPT_ENCODING, ACCEPT_LANGUAGE, ALLOW, CACHE_CONTROL, CONTENT_TYPE, IF_MODIFIED_SINCE,
    LAST_MODIFIED, LOCATION, VARY,
};
use percent_encoding::percent_decode_str;
use serve::encoding::AcceptEncoding;
use serve::render::{self, RenderParams, Rendered};
use serve::resolver::ArtifactResolver;
use serve::state::EnvState;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<ArtifactResolver>,
    pub env: EnvState,
    pub params: Arc<RenderParams>,
    pub default_locale: Option<String>,
}

enum Outcome {
    Rendered(Rendered),
    Redirect(String),
    NotFound,
}

#[tracing::instrument(skip_all, fields(method = %req.method(), path = req.uri().path()))]
pub async fn handle(State(state): State<AppState>, req: Request<Body>) -> Response {
    let method = req.method().clone();
    if method != Method::GET && method != Method::HEAD {
        return status_json(StatusCode::METHOD_NOT_ALLOWED);
    }

    // Clients request the encoded spelling of on-disk names.
    let path = match percent_decode_str(req.uri().path()).decode_utf8() {
        Ok(path) => path.into_owned(),
        Err(_) => return status_json(StatusCode::NOT_FOUND),
    };
    let if_modified_since =
        DateTime::parse_from_rfc2822(header_str(&req, IF_MODIFIED_SINCE)).ok();
    let accept = AcceptEncoding::parse(header_str(&req, ACCEPT_ENCODING));
    let mut languages: Vec<String> = header_str(&req, ACCEPT_LANGUAGE)
        .split(',')
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .collect();
    if let Some(default_locale) = &state.default_locale {
        languages.push(default_locale.clone());
    }

    let worker = state.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let artifact = worker.resolver.resolve(&path);
        if artifact.is_not_found() {
            return match worker.resolver.match_locale(&languages) {
                Some(locale) => Outcome::Redirect(locale),
                None => Outcome::NotFound,
            };
        }
        let env = worker.env.snapshot();
        Outcome::Rendered(render::render(&artifact, &accept, &worker.params, &env))
    })
    .await;

    match outcome {
        Ok(Outcome::Rendered(rendered)) => respond(&method, if_modified_since, rendered),
        Ok(Outcome::Redirect(locale)) => redirect(&locale),
        Ok(Outcome::NotFound) => status_json(StatusCode::NOT_FOUND),
        Err(error) => {
            error!(%error, "render task failed");
            status_json(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn header_str<'a>(req: &'a Request<Body>, name: http::header::HeaderName) -> &'a str {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

fn respond(
    method: &Method,
    if_modified_since: Option<DateTime<chrono::FixedOffset>>,
    rendered: Rendered,
) -> Response {
    if let Some(modified) = rendered.modified {
        if not_modified_since(modified, if_modified_since, &rendered.headers) {
            let mut builder = Response::builder().status(StatusCode::NOT_MODIFIED);
            for (name, value) in &rendered.headers {
                if *name == CACHE_CONTROL || *name == VARY {
                    builder = builder.header(name, value.as_str());
                }
            }
            builder = builder.header(LAST_MODIFIED, http_date(modified));
            return builder.body(Body::empty()).unwrap_or_else(|error| {
                error!(%error, "failed to assemble response");
                Response::new(Body::empty())
            });
        }
    }

    let mut builder = Response::builder().status(StatusCode::OK);
    for (name, value) in rendered.headers {
        builder = builder.header(name, value);
    }
    if let Some(modified) = rendered.modified {
        builder = builder.header(LAST_MODIFIED, http_date(modified));
    }
    let body = if method == Method::HEAD {
        builder = builder.header(http::header::CONTENT_LENGTH, rendered.body.len());
        Body::empty()
    } else {
        Body::from(rendered.body)
    };
    builder.body(body).unwrap_or_else(|error| {
        error!(%error, "failed to assemble response");
        Response::new(Body::empty())
    })
}

/// Last-Modified carries second precision, so the comparison truncates to
/// whole seconds. Uncacheable bodies are always re-sent.
fn not_modified_since(
    modified: SystemTime,
    if_modified_since: Option<DateTime<chrono::FixedOffset>>,
    headers: &[(http::header::HeaderName, String)],
) -> bool {
    let Some(since) = if_modified_since else {
        return false;
    };
    let no_store = headers
        .iter()
        .any(|(name, value)| *name == CACHE_CONTROL && value == "no-store");
    !no_store && DateTime::<Utc>::from(modified).timestamp() <= since.timestamp()
}

fn redirect(locale: &str) -> Response {
    let response = Response::builder()
        .status(StatusCode::TEMPORARY_REDIRECT)
        .header(LOCATION, format!("/{locale}"))
        .body(Body::empty());
    response.unwrap_or_else(|error| {
        error!(%error, "failed to assemble redirect");
        Response::new(Body::empty())
    })
}

/// JSON error surface shared by every non-content status.
pub(crate) fn status_json(status: StatusCode) -> Response {
    let body = serde_json::json!({
        "code": status.as_u16(),
        "status": status.canonical_reason().unwrap_or(""),
    })
    .to_string();
    let mut builder = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json");
    if status == StatusCode::METHOD_NOT_ALLOWED {
        builder = builder.header(ALLOW, "GET, HEAD");
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|error| {
            error!(%error, "failed to assemble status response");
            Response::new(Body::empty())
        })
}

fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
