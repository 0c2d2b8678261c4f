//! Error types shared across the OGC API services.

use thiserror::Error;

/// Result type alias using OgcError.
pub type OgcResult<T> = Result<T, OgcError>;

/// Primary error type for OGC API operations.
#[derive(Debug, Error)]
pub enum OgcError {
    // === Request errors ===
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("Unknown query parameter(s): {0}")]
    UnknownParameter(String),

    #[error("Invalid BBOX: {0}")]
    InvalidBbox(String),

    #[error("Requested format not supported: {0}")]
    UnsupportedFormat(String),

    // === Lookup errors ===
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Feature not found: {0}")]
    FeatureNotFound(i64),

    #[error("Style not found: {0}")]
    StyleNotFound(String),

    // === Data errors ===
    #[error("Datasource error: {0}")]
    DatasourceError(String),

    #[error("Failed to decode geometry: {0}")]
    GeometryError(String),

    // === Infrastructure errors ===
    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Request timeout")]
    Timeout,
}

impl OgcError {
    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            OgcError::MissingParameter(_)
            | OgcError::InvalidParameter { .. }
            | OgcError::UnknownParameter(_)
            | OgcError::InvalidBbox(_) => 400,

            OgcError::CollectionNotFound(_)
            | OgcError::FeatureNotFound(_)
            | OgcError::StyleNotFound(_)
            | OgcError::UnsupportedFormat(_) => 404,

            OgcError::Timeout => 504,

            _ => 500,
        }
    }
}

impl From<serde_json::Error> for OgcError {
    fn from(err: serde_json::Error) -> Self {
        OgcError::InternalError(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_errors_map_to_400() {
        let err = OgcError::InvalidParameter {
            param: "limit".to_string(),
            message: "must be numeric".to_string(),
        };
        assert_eq!(err.http_status_code(), 400);
        assert_eq!(OgcError::InvalidBbox("x".to_string()).http_status_code(), 400);
    }

    #[test]
    fn test_lookup_errors_map_to_404() {
        assert_eq!(
            OgcError::CollectionNotFound("addresses".to_string()).http_status_code(),
            404
        );
        assert_eq!(OgcError::FeatureNotFound(42).http_status_code(), 404);
    }

    #[test]
    fn test_datasource_errors_map_to_500() {
        assert_eq!(
            OgcError::DatasourceError("sqlite gone".to_string()).http_status_code(),
            500
        );
    }
}
