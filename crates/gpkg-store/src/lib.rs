//! GeoPackage-backed feature datasource.
//!
//! Opens a spatially-indexed GeoPackage (a SQLite database following the OGC
//! GeoPackage schema) read-only and serves paginated feature queries with
//! optional bounding-box filtering. Pagination is cursor-based; bbox queries
//! adaptively pick the R-tree sidecar index for small windows and the
//! compound B-tree index for large ones.

pub mod datasource;
pub mod error;
pub mod geopackage;
pub mod mapper;

pub use datasource::{FeatureDatasource, FeatureOptions};
pub use error::{StoreError, StoreResult};
pub use geopackage::{CollectionRef, GeoPackage, GeoPackageOptions};
