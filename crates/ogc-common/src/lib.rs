//! Shared domain types for the OGC API services.
//!
//! This crate is protocol-plumbing free: it holds the bounding box type,
//! the cursor codec used for pagination, the feature domain model and the
//! GeoJSON response shapes. The HTTP layer and the datasources both depend
//! on it, never the other way around.

pub mod bbox;
pub mod cursor;
pub mod error;
pub mod feature;
pub mod links;

pub use bbox::BoundingBox;
pub use cursor::{Cursors, DecodedCursor, EncodedCursor, PrevNextFid};
pub use error::{OgcError, OgcResult};
pub use feature::{Feature, FeatureCollection, PropertyValue};
pub use links::Link;
