//! Datasource abstraction over feature stores.

use async_trait::async_trait;
use ogc_common::{BoundingBox, Cursors, DecodedCursor, Feature, FeatureCollection};

use crate::error::StoreResult;

/// Options to select a certain set of features.
#[derive(Debug, Clone)]
pub struct FeatureOptions {
    /// Pagination position, bound to the filter checksum.
    pub cursor: DecodedCursor,
    /// Page size (already clamped by the caller).
    pub limit: u32,

    /// Filtering by bounding box.
    pub bbox: Option<BoundingBox>,
    /// EPSG code of the bbox coordinates.
    pub bbox_crs: i32,
}

/// A datasource holding all the features for a single dataset.
///
/// Implementations (GeoPackage today, PostGIS later) are selected at
/// startup; handlers are polymorphic over this trait and hold no
/// datasource-specific state.
#[async_trait]
pub trait FeatureDatasource: Send + Sync {
    /// Return a page of features plus the pagination cursors for it.
    async fn get_features(
        &self,
        collection: &str,
        options: FeatureOptions,
    ) -> StoreResult<(FeatureCollection, Cursors)>;

    /// Return a specific feature, or `None` when the id is absent.
    async fn get_feature(&self, collection: &str, feature_id: i64) -> StoreResult<Option<Feature>>;

    /// Close (connections to) the datasource gracefully.
    fn close(&self);
}
