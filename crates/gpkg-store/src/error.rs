//! Error types for the GeoPackage datasource.

use thiserror::Error;

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the feature datasource.
///
/// These carry raw driver detail and are meant for logging; handlers must
/// map them to sanitized client-facing messages.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("can't query collection '{collection}' since it doesn't exist in geopackage, available in geopackage: {available:?}")]
    TableNotFound {
        collection: String,
        available: Vec<String>,
    },

    #[error("no feature tables found in gpkg_contents, can't serve features")]
    NoFeatureTables,

    #[error("missing index: failed to read index '{index}' from table '{table}'")]
    MissingIndex { index: String, table: String },

    #[error("incorrect index: expected index '{index}' with columns '{expected}' to exist on table '{table}', found indexed columns '{actual}'")]
    WrongIndexColumns {
        index: String,
        table: String,
        expected: String,
        actual: String,
    },

    #[error("unexpected type for sqlite column '{column}': {sql_type}")]
    UnexpectedColumnType { column: String, sql_type: String },

    #[error("failed to map/decode geometry from datastore: {0}")]
    Geometry(String),

    #[error("query exceeded the configured timeout")]
    Timeout,

    #[error("{0}")]
    Setup(String),
}
