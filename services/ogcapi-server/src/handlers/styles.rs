//! OGC API Styles handlers. All payloads are pre-rendered at startup.

use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, Uri};
use axum::response::Response;

use crate::content_negotiation::{negotiate_format, negotiate_language, Format};
use crate::handlers::{not_found, query_pairs, serve_page};
use crate::state::AppState;
use crate::templates::TemplateKey;

const PAGE_FORMATS: &[Format] = &[Format::Json, Format::Html];

fn style_exists(state: &AppState, style_id: &str) -> bool {
    state
        .config
        .ogc_api
        .styles
        .as_ref()
        .is_some_and(|styles| styles.supported_styles.iter().any(|s| s.id == style_id))
}

/// GET /styles - List all styles
pub async fn styles_handler(
    Extension(state): Extension<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let query = query_pairs(&uri);
    let Some(format) = negotiate_format(&query, &headers, PAGE_FORMATS) else {
        return not_found();
    };
    let (language, cookie) = negotiate_language(&query, &headers, &state.config.languages);
    let key = TemplateKey::for_page("styles", format).with_language(language);
    serve_page(&state, &uri, &key, cookie)
}

/// GET /styles/:styleId - The stylesheet itself
pub async fn style_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(style_id): Path<String>,
    uri: Uri,
) -> Response {
    if !style_exists(&state, &style_id) {
        return not_found();
    }

    // stylesheets are not localized; they're stored under the default language
    let language = state.config.languages[0].clone();
    let key = TemplateKey::for_page("style", Format::Json)
        .with_instance(style_id)
        .with_language(language);
    serve_page(&state, &uri, &key, None)
}

/// GET /styles/:styleId/metadata - Style metadata
pub async fn style_metadata_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(style_id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if !style_exists(&state, &style_id) {
        return not_found();
    }

    let query = query_pairs(&uri);
    let Some(format) = negotiate_format(&query, &headers, PAGE_FORMATS) else {
        return not_found();
    };
    let (language, cookie) = negotiate_language(&query, &headers, &state.config.languages);
    let key = TemplateKey::for_page("style-metadata", format)
        .with_instance(style_id)
        .with_language(language);
    serve_page(&state, &uri, &key, cookie)
}
