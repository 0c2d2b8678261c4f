//! OGC API Features handlers: feature collections and single features.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Extension, Path};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::Response;
use sha2::{Digest, Sha256};
use tracing::{error, info};

use gpkg_store::FeatureOptions;
use ogc_common::{BoundingBox, Cursors, EncodedCursor, Link, OgcError};

use crate::config::LimitConfig;
use crate::content_negotiation::{negotiate_format, negotiate_language, Format};
use crate::handlers::{error_response, not_found, ogc_error_response, query_pairs};
use crate::state::AppState;
use crate::templates::TemplateKey;

const LIMIT_PARAM: &str = "limit";
const BBOX_PARAM: &str = "bbox";
const DATETIME_PARAM: &str = "datetime";
const CURSOR_PARAM: &str = "cursor";

/// The bbox is assumed to be in the Dutch national CRS.
/// TODO derive from a bbox-crs parameter once multi-CRS support lands.
const DEFAULT_BBOX_CRS: i32 = 28992;

const KNOWN_COLLECTION_PARAMS: &[&str] = &["f", "lang", LIMIT_PARAM, BBOX_PARAM, DATETIME_PARAM, CURSOR_PARAM];
const KNOWN_FEATURE_PARAMS: &[&str] = &["f", "lang"];

const FEATURE_FORMATS: &[Format] = &[Format::Json, Format::Html, Format::JsonFg];

/// GET /collections/:collectionId/items - Feature collection page
pub async fn collection_items_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(collection_id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let query = query_pairs(&uri);
    if let Err(message) = state.openapi.validate_request(uri.path(), &query) {
        return error_response(StatusCode::BAD_REQUEST, &message);
    }
    if let Err(err) = validate_no_unknown_params(&query, KNOWN_COLLECTION_PARAMS) {
        return ogc_error_response(&err);
    }

    let Some(features_config) = &state.config.ogc_api.features else {
        return not_found();
    };
    let Some(collection) = features_config
        .collections
        .iter()
        .find(|c| c.id == collection_id)
    else {
        info!("collection {collection_id} doesn't exist in this features service");
        return not_found();
    };
    let Some(datasource) = &state.datasource else {
        return not_found();
    };

    // strict parameter parsing; all failures are reported at once
    let mut problems: Vec<OgcError> = Vec::new();
    let limit = parse_limit(&query, &features_config.limit).unwrap_or_else(|err| {
        problems.push(err);
        0
    });
    let bbox = parse_bbox(&query).unwrap_or_else(|err| {
        problems.push(err);
        None
    });
    if let Err(err) = parse_datetime(&query) {
        problems.push(err);
    }
    if !problems.is_empty() {
        let message = problems
            .iter()
            .map(OgcError::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        return error_response(StatusCode::BAD_REQUEST, &message);
    }

    let checksum = filters_checksum(&query);
    let encoded_cursor = EncodedCursor::from(param(&query, CURSOR_PARAM).unwrap_or(""));
    let options = FeatureOptions {
        cursor: encoded_cursor.decode(&checksum),
        limit,
        bbox,
        bbox_crs: DEFAULT_BBOX_CRS,
    };

    let (mut collection_page, cursors) = match datasource.get_features(&collection_id, options).await
    {
        Ok(result) => result,
        Err(err) => {
            // log the cause, send a generic message to the client to prevent
            // information leakage from the datasource
            let message = format!("failed to retrieve feature collection {collection_id}");
            error!("{message}, error: {err}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &message);
        }
    };

    let (language, cookie) = negotiate_language(&query, &headers, &state.config.languages);
    match negotiate_format(&query, &headers, FEATURE_FORMATS) {
        Some(Format::Html) => {
            let params = serde_json::json!({
                "collectionId": collection.id,
                "collectionTitle": collection.title,
                "features": collection_page.features,
                "numberReturned": collection_page.number_returned,
                "limit": limit,
                "cursors": {
                    "prev": cursors.prev.as_str(),
                    "next": cursors.next.as_str(),
                    "hasPrev": cursors.has_prev,
                    "hasNext": cursors.has_next,
                },
            });
            render_html_page(&state, "features", &language, &params, cookie)
        }
        Some(Format::Json) => {
            collection_page.links =
                feature_collection_links(&state.config.base_url, &collection_id, &query, &cursors);
            geojson_response(&state, &uri, &collection_page, cookie)
        }
        // declared format, not yet implemented: a 404 beats a wrong payload
        Some(Format::JsonFg) => not_found(),
        _ => not_found(),
    }
}

/// GET /collections/:collectionId/items/:featureId - A single feature
pub async fn feature_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((collection_id, feature_id)): Path<(String, String)>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let Ok(feature_id) = feature_id.parse::<i64>() else {
        return error_response(StatusCode::BAD_REQUEST, "feature ID must be a number");
    };

    let query = query_pairs(&uri);
    if let Err(message) = state.openapi.validate_request(uri.path(), &query) {
        return error_response(StatusCode::BAD_REQUEST, &message);
    }
    if let Err(err) = validate_no_unknown_params(&query, KNOWN_FEATURE_PARAMS) {
        return ogc_error_response(&err);
    }

    let Some(features_config) = &state.config.ogc_api.features else {
        return not_found();
    };
    if !features_config.collections.iter().any(|c| c.id == collection_id) {
        return not_found();
    }
    let Some(datasource) = &state.datasource else {
        return not_found();
    };

    let feature = match datasource.get_feature(&collection_id, feature_id).await {
        Ok(Some(feature)) => feature,
        Ok(None) => {
            info!("no result found for collection '{collection_id}' and feature id: {feature_id}");
            return not_found();
        }
        Err(err) => {
            let message =
                format!("failed to retrieve feature {feature_id} in collection {collection_id}");
            error!("{message}, error: {err}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &message);
        }
    };

    let (language, cookie) = negotiate_language(&query, &headers, &state.config.languages);
    match negotiate_format(&query, &headers, FEATURE_FORMATS) {
        Some(Format::Html) => {
            let params = serde_json::json!({
                "collectionId": collection_id,
                "feature": feature,
            });
            render_html_page(&state, "feature", &language, &params, cookie)
        }
        Some(Format::Json) => {
            let mut feature = feature;
            feature.links = feature_links(&state.config.base_url, &collection_id, feature_id);
            geojson_response(&state, &uri, &feature, cookie)
        }
        Some(Format::JsonFg) => not_found(),
        _ => not_found(),
    }
}

/// Checksum over the filter query parameters (everything except the cursor
/// itself), binding a cursor to its filter context. Order-insensitive,
/// truncated to keep cursors compact.
pub(crate) fn filters_checksum(query: &[(String, String)]) -> Vec<u8> {
    let mut filters: Vec<&(String, String)> = query
        .iter()
        .filter(|(key, _)| key != CURSOR_PARAM)
        .collect();
    filters.sort();

    let mut hasher = Sha256::new();
    for (key, value) in filters {
        hasher.update(key.as_bytes());
        hasher.update([0]);
        hasher.update(value.as_bytes());
        hasher.update([0]);
    }
    hasher.finalize()[..8].to_vec()
}

fn param<'a>(query: &'a [(String, String)], name: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn validate_no_unknown_params(
    query: &[(String, String)],
    known: &[&str],
) -> Result<(), OgcError> {
    let unknown: Vec<&str> = query
        .iter()
        .filter(|(key, _)| !known.contains(&key.as_str()))
        .map(|(key, _)| key.as_str())
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(OgcError::UnknownParameter(unknown.join(", ")))
    }
}

fn parse_limit(query: &[(String, String)], limits: &LimitConfig) -> Result<u32, OgcError> {
    let Some(raw) = param(query, LIMIT_PARAM) else {
        return Ok(limits.default);
    };
    let limit: i64 = raw.parse().map_err(|_| OgcError::InvalidParameter {
        param: LIMIT_PARAM.to_string(),
        message: "limit must be numeric".to_string(),
    })?;
    if limit < 0 {
        return Err(OgcError::InvalidParameter {
            param: LIMIT_PARAM.to_string(),
            message: "limit can't be negative".to_string(),
        });
    }
    // OpenAPI validation doesn't cap the maximum; clamp silently
    Ok((limit as u32).min(limits.max))
}

fn parse_bbox(query: &[(String, String)]) -> Result<Option<BoundingBox>, OgcError> {
    let Some(raw) = param(query, BBOX_PARAM) else {
        return Ok(None);
    };
    BoundingBox::from_query_param(raw)
        .map(Some)
        .map_err(|err| OgcError::InvalidBbox(err.to_string()))
}

fn parse_datetime(query: &[(String, String)]) -> Result<(), OgcError> {
    if param(query, DATETIME_PARAM).is_some() {
        return Err(OgcError::InvalidParameter {
            param: DATETIME_PARAM.to_string(),
            message: "datetime param is currently not supported".to_string(),
        });
    }
    Ok(())
}

fn feature_collection_links(
    base_url: &str,
    collection_id: &str,
    query: &[(String, String)],
    cursors: &Cursors,
) -> Vec<Link> {
    let items_url = format!("{base_url}/collections/{collection_id}/items");
    let filters: Vec<(String, String)> = query
        .iter()
        .filter(|(key, _)| key != CURSOR_PARAM && key != "f")
        .cloned()
        .collect();

    let mut links = vec![
        Link::new(url_with(&items_url, &filters, &[("f", "json")]), "self")
            .with_type(Format::geojson_media_type()),
        Link::new(url_with(&items_url, &filters, &[("f", "html")]), "alternate")
            .with_type(Format::Html.media_type()),
    ];
    if cursors.has_next {
        links.push(
            Link::new(
                url_with(
                    &items_url,
                    &filters,
                    &[("f", "json"), (CURSOR_PARAM, cursors.next.as_str())],
                ),
                "next",
            )
            .with_type(Format::geojson_media_type()),
        );
    }
    if cursors.has_prev {
        links.push(
            Link::new(
                url_with(
                    &items_url,
                    &filters,
                    &[("f", "json"), (CURSOR_PARAM, cursors.prev.as_str())],
                ),
                "prev",
            )
            .with_type(Format::geojson_media_type()),
        );
    }
    links
}

fn feature_links(base_url: &str, collection_id: &str, feature_id: i64) -> Vec<Link> {
    vec![
        Link::new(
            format!("{base_url}/collections/{collection_id}/items/{feature_id}?f=json"),
            "self",
        )
        .with_type(Format::geojson_media_type()),
        Link::new(
            format!("{base_url}/collections/{collection_id}"),
            "collection",
        )
        .with_type(Format::Json.media_type()),
    ]
}

fn url_with(base: &str, filters: &[(String, String)], extra: &[(&str, &str)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in filters {
        serializer.append_pair(key, value);
    }
    for (key, value) in extra {
        serializer.append_pair(key, value);
    }
    format!("{base}?{}", serializer.finish())
}

/// Serialize a GeoJSON payload, validate it against the spec and write it.
fn geojson_response<T: serde::Serialize>(
    state: &AppState,
    uri: &Uri,
    payload: &T,
    set_cookie: Option<String>,
) -> Response {
    let body = match serde_json::to_vec(payload) {
        Ok(body) => body,
        Err(err) => {
            error!("failed to serialize geojson response: {err}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to serialize response",
            );
        }
    };

    let content_type = Format::geojson_media_type();
    if let Err(message) = state.openapi.validate_response(content_type, &body, uri.path()) {
        error!("{message}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &message);
    }

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type);
    if let Some(cookie) = set_cookie {
        builder = builder.header(header::SET_COOKIE, cookie);
    }
    builder.body(Body::from(body)).unwrap()
}

fn render_html_page(
    state: &AppState,
    page: &str,
    language: &str,
    params: &serde_json::Value,
    set_cookie: Option<String>,
) -> Response {
    let key = TemplateKey::for_page(page, Format::Html).with_language(language);
    match state.templates.render(&key, params) {
        Ok(body) => {
            let mut builder = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, Format::Html.media_type());
            if let Some(cookie) = set_cookie {
                builder = builder.header(header::SET_COOKIE, cookie);
            }
            builder.body(Body::from(body)).unwrap()
        }
        Err(err) => {
            error!("failed to render {page} page: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to render page")
        }
    }
}
