//! Health and debug endpoints.

use std::sync::Arc;

use axum::extract::Extension;
use axum::http::{header, StatusCode};
use axum::response::Response;

use crate::state::AppState;

/// GET /health - liveness probe
pub async fn health_handler() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain")
        .body("OK".into())
        .unwrap()
}

/// GET /debug - runtime information, served on the loopback debug listener
/// only.
pub async fn debug_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    let info = serde_json::json!({
        "title": state.config.title,
        "version": state.config.version,
        "baseUrl": state.config.base_url,
        "languages": state.config.languages,
        "collections": state
            .config
            .all_collections()
            .iter()
            .map(|c| c.id.clone())
            .collect::<Vec<_>>(),
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(serde_json::to_string_pretty(&info).unwrap_or_default().into())
        .unwrap()
}
