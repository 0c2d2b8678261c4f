//! Reverse proxy for tile and 3D-tile payloads.
//!
//! Forwards a request to the configured upstream tile server and streams the
//! response back. OGC tile specs require a 204 for empty-but-valid tiles
//! within declared limits; the upstream commonly answers 404, so callers can
//! opt into rewriting 404 to 204 without touching the upstream.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use reqwest::Client;
use tracing::error;
use url::Url;

/// Hop-by-hop headers that must not be forwarded in either direction.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub struct ReverseProxy {
    client: Client,
    base_url: String,
}

impl ReverseProxy {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(8)
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    /// Forward a GET request to the target URL and relay the upstream
    /// response. The inbound Host header is suppressed, X-Forwarded-*
    /// headers are added and X-BaseUrl carries the public base URL.
    pub async fn forward(
        &self,
        inbound_headers: &HeaderMap,
        target: Url,
        prefer_204: bool,
        content_type_override: Option<&str>,
    ) -> Response {
        let mut outbound_headers = HeaderMap::new();
        for (name, value) in inbound_headers {
            if is_hop_by_hop(name) || name == header::HOST {
                continue;
            }
            outbound_headers.insert(name.clone(), value.clone());
        }
        if let Some(host) = inbound_headers.get(header::HOST) {
            outbound_headers.insert(HeaderName::from_static("x-forwarded-host"), host.clone());
        }
        outbound_headers.insert(
            HeaderName::from_static("x-forwarded-proto"),
            HeaderValue::from_static("http"),
        );
        if let Ok(base_url) = HeaderValue::from_str(&self.base_url) {
            outbound_headers.insert(HeaderName::from_static("x-baseurl"), base_url);
        }

        let upstream = match self
            .client
            .get(target.clone())
            .headers(outbound_headers)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                error!("proxying to {target} failed: {err}");
                return Response::builder()
                    .status(StatusCode::BAD_GATEWAY)
                    .body(Body::from("upstream unavailable"))
                    .unwrap();
            }
        };

        let status = upstream.status();
        if prefer_204 && status == reqwest::StatusCode::NOT_FOUND {
            // empty tile within the tile matrix limits
            return Response::builder()
                .status(StatusCode::NO_CONTENT)
                .header(header::CONTENT_LENGTH, 0)
                .body(Body::empty())
                .unwrap();
        }

        let mut builder = Response::builder().status(status.as_u16());
        for (name, value) in upstream.headers() {
            if is_hop_by_hop(name) || name == header::CONTENT_TYPE {
                continue;
            }
            builder = builder.header(name, value);
        }
        let content_type: Option<HeaderValue> = match content_type_override {
            Some(overridden) => HeaderValue::from_str(overridden).ok(),
            None => upstream.headers().get(header::CONTENT_TYPE).cloned(),
        };
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }

        builder
            .body(Body::from_stream(upstream.bytes_stream()))
            .unwrap()
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}
