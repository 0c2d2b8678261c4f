//! OGC API Tiles handlers. Tile payloads are proxied to the configured
//! tile server; metadata pages are pre-rendered.

use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::Response;
use url::Url;

use crate::content_negotiation::{negotiate_format, negotiate_language, Format};
use crate::handlers::{error_response, not_found, query_pairs, serve_page};
use crate::state::AppState;
use crate::templates::TemplateKey;

const PAGE_FORMATS: &[Format] = &[Format::Json, Format::Html];

/// GET /tiles - Tileset listing
pub async fn tilesets_handler(
    Extension(state): Extension<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if state.config.ogc_api.tiles.is_none() {
        return not_found();
    }
    let query = query_pairs(&uri);
    let Some(format) = negotiate_format(&query, &headers, PAGE_FORMATS) else {
        return not_found();
    };
    let (language, cookie) = negotiate_language(&query, &headers, &state.config.languages);
    let key = TemplateKey::for_page("tiles", format).with_language(language);
    serve_page(&state, &uri, &key, cookie)
}

/// GET /tiles/:tileMatrixSetId/:tileMatrix/:tileRow/:tileCol - A single tile
///
/// Proxied to the tile server. An upstream 404 within the tile matrix limits
/// is rewritten to 204 (empty tile) per the OGC Tiles spec.
pub async fn tile_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((tile_matrix_set, tile_matrix, tile_row, tile_col)): Path<(
        String,
        String,
        String,
        String,
    )>,
    headers: HeaderMap,
) -> Response {
    let Some(tiles) = &state.config.ogc_api.tiles else {
        return not_found();
    };

    // the tile column may carry an extension, e.g. "3.pbf"
    let tile_col = tile_col.trim_end_matches(".pbf").trim_end_matches(".mvt");
    let (Ok(z), Ok(x), Ok(y)) = (
        tile_matrix.parse::<u32>(),
        tile_row.parse::<u32>(),
        tile_col.parse::<u32>(),
    ) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "tile coordinates must be non-negative numbers",
        );
    };

    let target = format!("{}/{tile_matrix_set}/{z}/{x}/{y}.pbf", tiles.tile_server);
    let Ok(target) = Url::parse(&target) else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "invalid tile server URL");
    };

    state
        .proxy
        .forward(&headers, target, true, Some(Format::Mvt.media_type()))
        .await
}
