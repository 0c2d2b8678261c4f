//! OGC API 3D GeoVolumes handlers: 3D tilesets and tiles proxied to the
//! tile server.

use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::Response;
use url::Url;

use crate::handlers::{error_response, not_found};
use crate::state::AppState;

/// GET /collections/:collectionId/3dtiles/*tilePath - 3D tileset and tile
/// payloads.
///
/// Tileset and subtree JSON documents must 404 when absent; actual tile
/// payloads (glTF and friends) get the empty-tile 204 rewrite.
pub async fn tile_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((collection_id, tile_path)): Path<(String, String)>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let Some(geovolumes) = &state.config.ogc_api.geovolumes else {
        return not_found();
    };
    let Some(collection) = geovolumes
        .collections
        .iter()
        .find(|c| c.id == collection_id)
    else {
        return not_found();
    };

    // basepath on the tileserver defaults to the collection id
    let server_path = collection
        .tile_server_path
        .clone()
        .unwrap_or_else(|| collection.id.clone());

    let tile_path = tile_path.trim_start_matches('/');
    let mut target = format!("{}/{server_path}/{tile_path}", geovolumes.tile_server);
    if let Some(query) = uri.query() {
        target.push('?');
        target.push_str(query);
    }
    let Ok(target) = Url::parse(&target) else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "invalid tile server URL");
    };

    let prefer_204 = !tile_path.ends_with(".json");
    state.proxy.forward(&headers, target, prefer_204, None).await
}
