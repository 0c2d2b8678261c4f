//! Feature domain model with GeoJSON serialization.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::links::Link;

/// A single feature property value.
///
/// Properties are strongly typed: a column of an unexpected SQL type is a
/// mapping error, never a silently coerced value. Null-valued columns are
/// omitted from the property bag instead of carried as a variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

/// A feature: stable integer id, geometry and a property bag.
///
/// The geometry member is always serialized; a row without geometry yields
/// an explicit `"geometry": null`, which is valid GeoJSON.
#[derive(Debug, Clone, Serialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub feature_type: FeatureType,
    pub id: i64,
    pub geometry: Option<geojson::Geometry>,
    pub properties: BTreeMap<String, PropertyValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
}

/// Marker for the GeoJSON `"type": "Feature"` member.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureType;

impl Serialize for FeatureType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("Feature")
    }
}

impl Feature {
    pub fn new(id: i64, geometry: Option<geojson::Geometry>) -> Self {
        Self {
            feature_type: FeatureType,
            id,
            geometry,
            properties: BTreeMap::new(),
            links: Vec::new(),
        }
    }
}

/// An ordered page of features plus the adjacent feature ids used to build
/// pagination cursors. Features are in ascending fid order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub collection_type: FeatureCollectionType,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
    #[serde(rename = "numberReturned")]
    pub number_returned: usize,
    pub features: Vec<Feature>,
}

/// Marker for the GeoJSON `"type": "FeatureCollection"` member.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureCollectionType;

impl Serialize for FeatureCollectionType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("FeatureCollection")
    }
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            collection_type: FeatureCollectionType,
            links: Vec::new(),
            number_returned: features.len(),
            features,
        }
    }
}
