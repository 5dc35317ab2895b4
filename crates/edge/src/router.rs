use axum::http::StatusCode;
use axum::response::Response;
use axum::{routing::get, Router};

use crate::app::{self, AppState};

#[tracing::instrument(skip_all)]
pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/__heartbeat__", get(heartbeat).fallback(method_not_allowed))
        .route("/__lbheartbeat__", get(heartbeat).fallback(method_not_allowed))
        .fallback(app::handle)
        .with_state(state)
}

async fn heartbeat() -> &'static str {
    "UP"
}

async fn method_not_allowed() -> Response {
    app::status_json(StatusCode::METHOD_NOT_ALLOWED)
}
