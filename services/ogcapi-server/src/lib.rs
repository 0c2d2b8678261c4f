//! OGC API server library.
//!
//! Implements OGC API Common, Collections, Features, Tiles, Styles and
//! 3D GeoVolumes over a single configuration, backed by a GeoPackage.

pub mod config;
pub mod content_negotiation;
pub mod handlers;
pub mod openapi;
pub mod proxy;
pub mod state;
pub mod templates;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::Extension;
use axum::http::{HeaderName, HeaderValue};
use axum::routing::get;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tower_http::CompressionLevel;

use crate::state::AppState;

/// Build the main router: routes for every enabled API plus the shared
/// middleware stack.
pub fn build_router(state: Arc<AppState>) -> Result<Router> {
    let config = &state.config;

    let mut router = Router::new()
        // OGC Common part 1 is always served
        .route("/", get(handlers::core::landing_handler))
        .route("/conformance", get(handlers::core::conformance_handler))
        .route("/api", get(handlers::core::api_handler))
        .route("/health", get(handlers::health::health_handler));

    // OGC Common part 2
    if !config.all_collections().is_empty() {
        router = router
            .route("/collections", get(handlers::core::collections_handler))
            .route(
                "/collections/:collection_id",
                get(handlers::core::collection_handler),
            );
    }
    // OGC Features API
    if config.ogc_api.features.is_some() {
        router = router
            .route(
                "/collections/:collection_id/items",
                get(handlers::features::collection_items_handler),
            )
            .route(
                "/collections/:collection_id/items/:feature_id",
                get(handlers::features::feature_handler),
            );
    }
    // OGC Styles API
    if config.ogc_api.styles.is_some() {
        router = router
            .route("/styles", get(handlers::styles::styles_handler))
            .route("/styles/:style_id", get(handlers::styles::style_handler))
            .route(
                "/styles/:style_id/metadata",
                get(handlers::styles::style_metadata_handler),
            );
    }
    // OGC Tiles API
    if config.ogc_api.tiles.is_some() {
        router = router
            .route("/tiles", get(handlers::tiles::tilesets_handler))
            .route(
                "/tiles/:tile_matrix_set/:tile_matrix/:tile_row/:tile_col",
                get(handlers::tiles::tile_handler),
            );
    }
    // OGC 3D GeoVolumes API
    if config.ogc_api.geovolumes.is_some() {
        router = router.route(
            "/collections/:collection_id/3dtiles/*tile_path",
            get(handlers::geovolumes::tile_handler),
        );
    }

    let api_version = HeaderValue::from_str(&config.version)?;

    Ok(router
        .layer(Extension(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new().quality(CompressionLevel::Precise(5)))
        .layer(CatchPanicLayer::new())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("api-version"),
            api_version,
        ))
        // single whole-request timeout; tower-http has no separate
        // header/body read phases
        .layer(TimeoutLayer::new(Duration::from_secs(15))))
}

/// Router for the loopback-only debug listener.
pub fn build_debug_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/debug", get(handlers::health::debug_handler))
        .route("/debug/health", get(handlers::health::health_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}
