//! OGC API Common handlers: landing page, conformance, API description and
//! collections.

use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::Response;

use crate::content_negotiation::{negotiate_format, negotiate_language, Format};
use crate::handlers::{not_found, query_pairs, serve_page};
use crate::state::AppState;
use crate::templates::TemplateKey;

/// Conformance classes implemented by this server.
pub const CONFORMANCE_CLASSES: &[&str] = &[
    "http://www.opengis.net/spec/ogcapi-common-1/1.0/conf/core",
    "http://www.opengis.net/spec/ogcapi-common-1/1.0/conf/landing-page",
    "http://www.opengis.net/spec/ogcapi-common-1/1.0/conf/json",
    "http://www.opengis.net/spec/ogcapi-common-1/1.0/conf/html",
    "http://www.opengis.net/spec/ogcapi-common-2/1.0/conf/collections",
    "http://www.opengis.net/spec/ogcapi-features-1/1.0/conf/core",
    "http://www.opengis.net/spec/ogcapi-features-1/1.0/conf/oas30",
    "http://www.opengis.net/spec/ogcapi-features-1/1.0/conf/geojson",
    "http://www.opengis.net/spec/ogcapi-features-1/1.0/conf/html",
];

const PAGE_FORMATS: &[Format] = &[Format::Json, Format::Html];

fn negotiated_page_key(
    state: &AppState,
    uri: &Uri,
    headers: &HeaderMap,
    page: &str,
) -> Result<(TemplateKey, Option<String>), Response> {
    let query = query_pairs(uri);
    let Some(format) = negotiate_format(&query, headers, PAGE_FORMATS) else {
        return Err(not_found());
    };
    let (language, cookie) = negotiate_language(&query, headers, &state.config.languages);
    Ok((
        TemplateKey::for_page(page, format).with_language(language),
        cookie,
    ))
}

/// GET / - Landing page
pub async fn landing_handler(
    Extension(state): Extension<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    match negotiated_page_key(&state, &uri, &headers, "landing") {
        Ok((key, cookie)) => serve_page(&state, &uri, &key, cookie),
        Err(response) => response,
    }
}

/// GET /conformance - Conformance declaration
pub async fn conformance_handler(
    Extension(state): Extension<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    match negotiated_page_key(&state, &uri, &headers, "conformance") {
        Ok((key, cookie)) => serve_page(&state, &uri, &key, cookie),
        Err(response) => response,
    }
}

/// GET /api - OpenAPI description of this server
pub async fn api_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    let json = serde_json::to_string_pretty(state.openapi.document()).unwrap_or_default();

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            "application/vnd.oai.openapi+json;version=3.0",
        )
        .body(json.into())
        .unwrap()
}

/// GET /collections - List all collections
pub async fn collections_handler(
    Extension(state): Extension<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    match negotiated_page_key(&state, &uri, &headers, "collections") {
        Ok((key, cookie)) => serve_page(&state, &uri, &key, cookie),
        Err(response) => response,
    }
}

/// GET /collections/:collectionId - A single collection
pub async fn collection_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(collection_id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if state.config.find_collection(&collection_id).is_none() {
        return not_found();
    }

    match negotiated_page_key(&state, &uri, &headers, "collection") {
        Ok((key, cookie)) => serve_page(&state, &uri, &key.with_instance(collection_id), cookie),
        Err(response) => response,
    }
}
