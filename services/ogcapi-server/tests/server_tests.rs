//! End-to-end tests for the HTTP surface: features pipeline, content
//! negotiation, pre-rendered pages and the tile proxy.
//!
//! The server is driven in-process through the router; the GeoPackage is
//! generated on the fly and opened with builtin spatial functions.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use rusqlite::Connection;
use tempfile::TempDir;
use tower::ServiceExt;

use ogcapi_server::build_router;
use ogcapi_server::config::{
    CollectionConfig, Config, DatasourceConfig, FeaturesConfig, GeoPackageConfig, LimitConfig,
    OgcApiConfig, StyleMetadata, StylesConfig, TilesConfig,
};
use ogcapi_server::state::AppState;

fn assets_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets")
}

/// Write a schema-correct GeoPackage with point features 1..=count at (i, i).
fn create_test_gpkg(path: &Path, count: i64) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "create table gpkg_contents (
            table_name text not null primary key,
            data_type text not null,
            identifier text unique,
            description text default '',
            last_change datetime not null default (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            min_x double, min_y double, max_x double, max_y double,
            srs_id integer
        );
        create table gpkg_geometry_columns (
            table_name text not null,
            column_name text not null,
            geometry_type_name text not null,
            srs_id integer not null,
            z tinyint not null,
            m tinyint not null
        );
        create table addresses (
            fid integer primary key,
            geom blob,
            minx real, miny real, maxx real, maxy real,
            name text
        );
        create index addresses_spatial_idx on addresses(fid, minx, maxx, miny, maxy);
        create virtual table rtree_addresses_geom using rtree(id, minx, maxx, miny, maxy);",
    )
    .unwrap();

    conn.execute(
        "insert into gpkg_contents (table_name, data_type, identifier, min_x, min_y, max_x, max_y, srs_id)
         values ('addresses', 'features', 'addresses', 0, 0, ?1, ?1, 28992)",
        [count as f64],
    )
    .unwrap();
    conn.execute(
        "insert into gpkg_geometry_columns values ('addresses', 'geom', 'POINT', 28992, 0, 0)",
        [],
    )
    .unwrap();

    for fid in 1..=count {
        let coord = fid as f64;
        let mut blob = vec![b'G', b'P', 0x00, 0x01];
        blob.extend_from_slice(&28992i32.to_le_bytes());
        blob.push(0x01);
        blob.extend_from_slice(&1u32.to_le_bytes());
        blob.extend_from_slice(&coord.to_le_bytes());
        blob.extend_from_slice(&coord.to_le_bytes());

        conn.execute(
            "insert into addresses (fid, geom, minx, miny, maxx, maxy, name)
             values (?1, ?2, ?3, ?3, ?3, ?3, ?4)",
            rusqlite::params![fid, blob, coord, format!("addr {fid}")],
        )
        .unwrap();
        conn.execute(
            "insert into rtree_addresses_geom values (?1, ?2, ?2, ?2, ?2)",
            rusqlite::params![fid, coord],
        )
        .unwrap();
    }
}

fn test_config(gpkg_path: &Path, tile_server: Option<String>) -> Config {
    Config {
        title: "Test OGC API".to_string(),
        service_abstract: "Addresses for testing".to_string(),
        base_url: "http://localhost:8080".to_string(),
        version: "1.0.0".to_string(),
        languages: vec!["en".to_string(), "nl".to_string()],
        templates_dir: assets_dir().join("templates"),
        i18n_dir: assets_dir().join("i18n"),
        ogc_api: OgcApiConfig {
            features: Some(FeaturesConfig {
                collections: vec![CollectionConfig {
                    id: "addresses".to_string(),
                    title: "Addresses".to_string(),
                    description: "All the addresses".to_string(),
                    datasource_id: None,
                    tile_server_path: None,
                }],
                limit: LimitConfig {
                    default: 10,
                    max: 100,
                },
                datasource: DatasourceConfig {
                    geopackage: Some(GeoPackageConfig {
                        path: gpkg_path.to_path_buf(),
                        fid: "fid".to_string(),
                        query_timeout_seconds: 15,
                        max_connections: 2,
                        spatialite: false,
                    }),
                },
            }),
            styles: Some(StylesConfig {
                default: "day".to_string(),
                supported_styles: vec![
                    StyleMetadata {
                        id: "day".to_string(),
                        title: "Day".to_string(),
                        description: "Light base map".to_string(),
                        keywords: vec!["light".to_string()],
                        last_updated: None,
                    },
                    StyleMetadata {
                        id: "night".to_string(),
                        title: "Night".to_string(),
                        description: "Dark base map".to_string(),
                        keywords: vec![],
                        last_updated: None,
                    },
                ],
            }),
            tiles: tile_server.map(|tile_server| TilesConfig {
                tile_server,
                types: vec!["vector".to_string()],
                supported_srs: vec!["NetherlandsRDNewQuad".to_string()],
            }),
            geovolumes: None,
        },
    }
}

async fn test_router(dir: &TempDir, tile_server: Option<String>) -> Router {
    let gpkg_path = dir.path().join("test.gpkg");
    create_test_gpkg(&gpkg_path, 10);
    let config = test_config(&gpkg_path, tile_server);
    let state = Arc::new(AppState::new(config, None).await.unwrap());
    build_router(state).unwrap()
}

async fn get(router: &Router, uri: &str) -> Response {
    router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = get(router, uri).await;
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn fids(body: &serde_json::Value) -> Vec<i64> {
    body["features"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["id"].as_i64().unwrap())
        .collect()
}

fn link<'a>(body: &'a serde_json::Value, rel: &str) -> Option<&'a str> {
    body["links"]
        .as_array()?
        .iter()
        .find(|l| l["rel"] == rel)
        .and_then(|l| l["href"].as_str())
}

/// Turn an absolute link from a response into a request path.
fn to_path(href: &str) -> String {
    href.replace("http://localhost:8080", "")
}

#[tokio::test]
async fn test_first_page_and_following_next_link() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir, None).await;

    let (status, body) = get_json(&router, "/collections/addresses/items?limit=2&f=json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "FeatureCollection");
    assert_eq!(body["numberReturned"], 2);
    assert_eq!(fids(&body), vec![1, 2]);

    let next = link(&body, "next").expect("next link").to_string();
    assert!(link(&body, "prev").is_none());

    let (status, body) = get_json(&router, &to_path(&next)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fids(&body), vec![3, 4]);
    assert!(link(&body, "prev").is_some());
}

#[tokio::test]
async fn test_stale_cursor_silently_restarts_at_first_page() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir, None).await;

    // cursor minted under bbox filters
    let (_, body) =
        get_json(&router, "/collections/addresses/items?limit=2&bbox=0,0,20,20&f=json").await;
    let next = link(&body, "next").unwrap();
    let cursor = next.split("cursor=").nth(1).unwrap().to_string();

    // replayed without the bbox: checksum mismatch, back to page one
    let (status, body) = get_json(
        &router,
        &format!("/collections/addresses/items?limit=2&f=json&cursor={cursor}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fids(&body), vec![1, 2]);
}

#[tokio::test]
async fn test_bbox_filtering() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir, None).await;

    let (status, body) =
        get_json(&router, "/collections/addresses/items?bbox=4.5,4.5,6.5,6.5&f=json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fids(&body), vec![5, 6]);
}

#[tokio::test]
async fn test_unknown_collection_is_404() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir, None).await;

    let response = get(&router, "/collections/unknown/items").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_strict_query_parameter_validation() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir, None).await;

    for uri in [
        "/collections/addresses/items?offset=3",
        "/collections/addresses/items?limit=ten",
        "/collections/addresses/items?limit=-1",
        "/collections/addresses/items?bbox=1,2,3",
        "/collections/addresses/items?datetime=2024-01-01",
    ] {
        let response = get(&router, uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn test_limit_above_max_is_clamped() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir, None).await;

    let (status, body) = get_json(&router, "/collections/addresses/items?limit=5000&f=json").await;
    assert_eq!(status, StatusCode::OK);
    // only 10 features exist, well under the clamped max of 100
    assert_eq!(body["numberReturned"], 10);
}

#[tokio::test]
async fn test_format_param_beats_accept_header() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir, None).await;

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/collections/addresses/items?f=json")
                .header(header::ACCEPT, "text/html")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/geo+json"
    );
}

#[tokio::test]
async fn test_features_html_rendering() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir, None).await;

    let response = get(&router, "/collections/addresses/items?f=html&limit=3").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let html = std::str::from_utf8(&body).unwrap();
    assert!(html.contains("Addresses"));
    assert!(html.contains("/collections/addresses/items/1"));
}

#[tokio::test]
async fn test_jsonfg_is_declared_but_not_implemented() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir, None).await;

    let response = get(&router, "/collections/addresses/items?f=jsonfg").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_single_feature() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir, None).await;

    let (status, body) = get_json(&router, "/collections/addresses/items/4?f=json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 4);
    assert_eq!(body["properties"]["name"], "addr 4");
    assert_eq!(body["geometry"]["type"], "Point");
    assert!(link(&body, "self").is_some());

    let response = get(&router, "/collections/addresses/items/99").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = get(&router, "/collections/addresses/items/abc").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_landing_conformance_and_collections_pages() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir, None).await;

    let (status, body) = get_json(&router, "/?f=json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Test OGC API");
    assert!(link(&body, "conformance").is_some());

    let (status, body) = get_json(&router, "/conformance?f=json").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["conformsTo"]
        .as_array()
        .unwrap()
        .iter()
        .any(|c| c.as_str().unwrap().contains("ogcapi-features")));

    let (status, body) = get_json(&router, "/collections?f=json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["collections"][0]["id"], "addresses");

    let response = get(&router, "/?f=html").await;
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
}

#[tokio::test]
async fn test_language_negotiation_sets_cookie_and_localizes() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir, None).await;

    let response = get(&router, "/conformance?f=html&lang=nl").await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(cookie.starts_with("lang=nl"));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(std::str::from_utf8(&body).unwrap().contains("Conformiteit"));
}

#[tokio::test]
async fn test_styles_pages() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir, None).await;

    let (status, body) = get_json(&router, "/styles?f=json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["default"], "day");

    let (status, body) = get_json(&router, "/styles/day").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "day");
    assert_eq!(body["version"], 8);

    let (status, body) = get_json(&router, "/styles/night/metadata?f=json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Night");

    let response = get(&router, "/styles/unknown").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_and_api_description() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir, None).await;

    let response = get(&router, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"OK");

    let (status, body) = get_json(&router, "/api").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["openapi"], "3.0.3");
}

#[tokio::test]
async fn test_api_version_header_is_set() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir, None).await;

    let response = get(&router, "/health").await;
    assert_eq!(response.headers()["api-version"], "1.0.0");
}

/// An upstream that answers 404 for every tile, as tile servers commonly do
/// for empty tiles.
async fn spawn_404_upstream() -> SocketAddr {
    let upstream = Router::new().fallback(|| async { StatusCode::NOT_FOUND });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, upstream).into_future());
    addr
}

#[tokio::test]
async fn test_tile_proxy_rewrites_404_to_204() {
    let upstream = spawn_404_upstream().await;
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir, Some(format!("http://{upstream}/tiles"))).await;

    let response = get(&router, "/tiles/NetherlandsRDNewQuad/0/0/0.pbf").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response.headers().get(header::CONTENT_TYPE).is_none());

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_tile_coordinates_must_be_numeric() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir, Some("http://127.0.0.1:1/tiles".to_string())).await;

    let response = get(&router, "/tiles/NetherlandsRDNewQuad/zero/0/0.pbf").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
