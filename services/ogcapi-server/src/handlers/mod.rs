//! HTTP handlers for the served OGC APIs.

pub mod core;
pub mod features;
pub mod geovolumes;
pub mod health;
pub mod styles;
pub mod tiles;

use axum::body::Body;
use axum::http::{header, StatusCode, Uri};
use axum::response::Response;
use ogc_common::OgcError;
use tracing::{error, warn};

use crate::state::AppState;
use crate::templates::TemplateKey;

/// Decode the query string into ordered key/value pairs.
pub(crate) fn query_pairs(uri: &Uri) -> Vec<(String, String)> {
    uri.query()
        .map(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(message.to_string()))
        .unwrap()
}

pub(crate) fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "404 page not found")
}

/// Map a domain error to its HTTP rendition.
pub(crate) fn ogc_error_response(err: &OgcError) -> Response {
    let status = StatusCode::from_u16(err.http_status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_response(status, &err.to_string())
}

/// Validate the incoming request against the OpenAPI spec, serve the
/// pre-rendered template for the given key and validate the response before
/// writing it.
pub(crate) fn serve_page(
    state: &AppState,
    uri: &Uri,
    key: &TemplateKey,
    set_cookie: Option<String>,
) -> Response {
    let query = query_pairs(uri);
    if let Err(message) = state.openapi.validate_request(uri.path(), &query) {
        warn!("{message}");
        return error_response(StatusCode::BAD_REQUEST, &message);
    }

    let Some(payload) = state.templates.rendered(key) else {
        return not_found();
    };
    let content_type = key.format.media_type();

    if let Err(message) = state.openapi.validate_response(content_type, payload, uri.path()) {
        error!("{message}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &message);
    }

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type);
    if let Some(cookie) = set_cookie {
        builder = builder.header(header::SET_COOKIE, cookie);
    }
    builder.body(Body::from(payload.to_vec())).unwrap()
}
