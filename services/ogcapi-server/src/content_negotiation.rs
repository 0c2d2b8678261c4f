//! Content negotiation: resolve each request to a (format, language) pair.
//!
//! The `f` query parameter wins over the Accept header; the Accept header is
//! parsed as a weighted list and intersected with the formats the endpoint
//! supports. Language comes from the `lang` query parameter, then a cookie,
//! then Accept-Language; the chosen language is written back to the cookie
//! so subsequent requests are consistent.

use axum::http::{header, HeaderMap};

pub const FORMAT_PARAM: &str = "f";
pub const LANGUAGE_PARAM: &str = "lang";
const LANGUAGE_COOKIE: &str = "lang";

/// Output formats the server can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Html,
    Json,
    JsonFg,
    Mvt,
    TileJson,
    Mapbox,
}

impl Format {
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "html" => Some(Format::Html),
            "json" => Some(Format::Json),
            "jsonfg" => Some(Format::JsonFg),
            "mvt" | "pbf" => Some(Format::Mvt),
            "tilejson" => Some(Format::TileJson),
            "mapbox" => Some(Format::Mapbox),
            _ => None,
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            Format::Html => "text/html",
            Format::Json => "application/json",
            Format::JsonFg => "application/vnd.ogc.fg+json",
            Format::Mvt => "application/vnd.mapbox-vector-tile",
            Format::TileJson => "application/json",
            Format::Mapbox => "application/vnd.mapbox.style+json",
        }
    }

    /// GeoJSON gets its own media type at the feature endpoints even though
    /// it negotiates as plain `json`.
    pub fn geojson_media_type() -> &'static str {
        "application/geo+json"
    }

    /// File extension used in template names.
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Html => "html",
            Format::Json | Format::TileJson => "json",
            Format::JsonFg => "jsonfg",
            Format::Mvt => "mvt",
            Format::Mapbox => "mapbox",
        }
    }

    fn matches_media_type(&self, media_type: &str) -> bool {
        match self {
            Format::Json => {
                media_type == "application/json" || media_type == "application/geo+json"
            }
            other => media_type == other.media_type(),
        }
    }
}

/// Resolve the response format for a request.
///
/// Returns `None` when the client explicitly asked (via `f` or Accept) for
/// something this endpoint doesn't serve.
pub fn negotiate_format(
    query: &[(String, String)],
    headers: &HeaderMap,
    supported: &[Format],
) -> Option<Format> {
    if let Some((_, value)) = query.iter().find(|(key, _)| key == FORMAT_PARAM) {
        let format = Format::from_param(value)?;
        return supported.contains(&format).then_some(format);
    }

    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("*/*");

    for media_type in parse_weighted_list(accept) {
        if media_type == "*/*" {
            return supported.first().copied();
        }
        if let Some(prefix) = media_type.strip_suffix("/*") {
            if let Some(format) = supported
                .iter()
                .find(|f| f.media_type().starts_with(&format!("{prefix}/")))
            {
                return Some(*format);
            }
            continue;
        }
        if let Some(format) = supported.iter().find(|f| f.matches_media_type(&media_type)) {
            return Some(*format);
        }
    }

    None
}

/// Resolve the response language and, when it didn't come from the cookie,
/// the Set-Cookie header value to persist it.
pub fn negotiate_language(
    query: &[(String, String)],
    headers: &HeaderMap,
    supported: &[String],
) -> (String, Option<String>) {
    debug_assert!(!supported.is_empty());

    if let Some((_, value)) = query.iter().find(|(key, _)| key == LANGUAGE_PARAM) {
        if let Some(language) = match_language(value, supported) {
            return (language.clone(), Some(language_cookie(&language)));
        }
    }

    if let Some(language) = language_from_cookie(headers, supported) {
        return (language, None);
    }

    if let Some(accept_language) = headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
    {
        for candidate in parse_weighted_list(accept_language) {
            if let Some(language) = match_language(&candidate, supported) {
                return (language.clone(), Some(language_cookie(&language)));
            }
        }
    }

    let fallback = supported[0].clone();
    let cookie = language_cookie(&fallback);
    (fallback, Some(cookie))
}

/// Parse a comma-separated header value with optional `;q=` weights into
/// values ordered by descending weight.
fn parse_weighted_list(value: &str) -> Vec<String> {
    let mut entries: Vec<(String, f32)> = value
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split(';');
            let item = parts.next()?.trim();
            if item.is_empty() {
                return None;
            }
            let quality = parts
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.parse::<f32>().ok())
                .unwrap_or(1.0);
            Some((item.to_string(), quality))
        })
        .collect();

    entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    entries.into_iter().map(|(item, _)| item).collect()
}

fn match_language<'a>(candidate: &str, supported: &'a [String]) -> Option<&'a String> {
    let primary = candidate.split('-').next().unwrap_or(candidate).to_ascii_lowercase();
    supported.iter().find(|lang| **lang == primary)
}

fn language_from_cookie(headers: &HeaderMap, supported: &[String]) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|cookie| {
        let (name, value) = cookie.trim().split_once('=')?;
        if name == LANGUAGE_COOKIE {
            match_language(value, supported).cloned()
        } else {
            None
        }
    })
}

fn language_cookie(language: &str) -> String {
    format!("{LANGUAGE_COOKIE}={language}; Path=/; Max-Age=31536000; SameSite=Lax")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SUPPORTED: &[Format] = &[Format::Json, Format::Html];

    fn headers(accept: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_str(accept).unwrap());
        headers
    }

    fn query(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_format_param_wins_over_accept() {
        let format = negotiate_format(&query(&[("f", "json")]), &headers("text/html"), SUPPORTED);
        assert_eq!(format, Some(Format::Json));
    }

    #[test]
    fn test_unknown_format_param_is_rejected() {
        let format = negotiate_format(&query(&[("f", "gml")]), &headers("*/*"), SUPPORTED);
        assert_eq!(format, None);
    }

    #[test]
    fn test_unsupported_format_param_is_rejected() {
        let format = negotiate_format(&query(&[("f", "mvt")]), &headers("*/*"), SUPPORTED);
        assert_eq!(format, None);
    }

    #[test]
    fn test_accept_weighted_list() {
        let format = negotiate_format(
            &[],
            &headers("text/html;q=0.8, application/json;q=0.9"),
            SUPPORTED,
        );
        assert_eq!(format, Some(Format::Json));
    }

    #[test]
    fn test_accept_wildcard_picks_endpoint_default() {
        let format = negotiate_format(&[], &headers("*/*"), SUPPORTED);
        assert_eq!(format, Some(Format::Json));
    }

    #[test]
    fn test_accept_type_wildcard() {
        let format = negotiate_format(&[], &headers("text/*"), SUPPORTED);
        assert_eq!(format, Some(Format::Html));
    }

    #[test]
    fn test_accept_geojson_negotiates_as_json() {
        let format = negotiate_format(&[], &headers("application/geo+json"), SUPPORTED);
        assert_eq!(format, Some(Format::Json));
    }

    #[test]
    fn test_no_accept_header_uses_default() {
        let format = negotiate_format(&[], &HeaderMap::new(), SUPPORTED);
        assert_eq!(format, Some(Format::Json));
    }

    #[test]
    fn test_browser_accept_prefers_html() {
        let format = negotiate_format(
            &[],
            &headers("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
            SUPPORTED,
        );
        assert_eq!(format, Some(Format::Html));
    }

    fn languages() -> Vec<String> {
        vec!["nl".to_string(), "en".to_string()]
    }

    #[test]
    fn test_language_param_sets_cookie() {
        let (language, cookie) = negotiate_language(
            &query(&[("lang", "en")]),
            &HeaderMap::new(),
            &languages(),
        );
        assert_eq!(language, "en");
        assert!(cookie.unwrap().starts_with("lang=en"));
    }

    #[test]
    fn test_language_cookie_is_respected() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("lang=en"));
        let (language, cookie) = negotiate_language(&[], &headers, &languages());
        assert_eq!(language, "en");
        assert!(cookie.is_none());
    }

    #[test]
    fn test_accept_language_with_region_tag() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        let (language, cookie) = negotiate_language(&[], &headers, &languages());
        assert_eq!(language, "en");
        assert!(cookie.is_some());
    }

    #[test]
    fn test_language_fallback_is_first_configured() {
        let (language, _) = negotiate_language(&[], &HeaderMap::new(), &languages());
        assert_eq!(language, "nl");
    }
}
