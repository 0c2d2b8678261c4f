//! Bounding box type and operations.

use geo_types::{polygon, Polygon};
use serde::{Deserialize, Serialize};
use wkt::ToWkt;

/// A geographic or projected bounding box.
///
/// For geographic CRS (EPSG:4326), coordinates are in degrees.
/// For projected CRS (EPSG:28992, etc.), coordinates are in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Parse an OGC `bbox` parameter string: "minx,miny,maxx,maxy".
    ///
    /// Exactly four comma-separated numbers are required; any other arity is
    /// an error. Reversed coordinates are accepted (they simply select
    /// nothing), matching OGC API Features behavior.
    pub fn from_query_param(s: &str) -> Result<Self, BboxParseError> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 4 {
            return Err(BboxParseError::InvalidFormat(s.to_string()));
        }

        Ok(Self {
            min_x: parts[0]
                .parse()
                .map_err(|_| BboxParseError::InvalidNumber(parts[0].to_string()))?,
            min_y: parts[1]
                .parse()
                .map_err(|_| BboxParseError::InvalidNumber(parts[1].to_string()))?,
            max_x: parts[2]
                .parse()
                .map_err(|_| BboxParseError::InvalidNumber(parts[2].to_string()))?,
            max_y: parts[3]
                .parse()
                .map_err(|_| BboxParseError::InvalidNumber(parts[3].to_string()))?,
        })
    }

    /// Check if this bbox intersects another. Reference predicate for
    /// cross-checking the SQL bbox filter, which does the real work.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// The bbox as a closed polygon ring.
    pub fn to_polygon(&self) -> Polygon<f64> {
        polygon![
            (x: self.min_x, y: self.min_y),
            (x: self.max_x, y: self.min_y),
            (x: self.max_x, y: self.max_y),
            (x: self.min_x, y: self.max_y),
            (x: self.min_x, y: self.min_y),
        ]
    }

    /// WKT rendering of the bbox polygon, suitable as a geometry
    /// function argument in SQL.
    pub fn to_wkt(&self) -> String {
        self.to_polygon().wkt_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BboxParseError {
    #[error("bbox should contain exactly 4 values separated by commas: minx,miny,maxx,maxy (got '{0}')")]
    InvalidFormat(String),

    #[error("Invalid number in bbox: {0}")]
    InvalidNumber(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bbox_param() {
        let bbox = BoundingBox::from_query_param("5.0,52.0,5.1,52.1").unwrap();
        assert_eq!(bbox.min_x, 5.0);
        assert_eq!(bbox.min_y, 52.0);
        assert_eq!(bbox.max_x, 5.1);
        assert_eq!(bbox.max_y, 52.1);
    }

    #[test]
    fn test_parse_bbox_wrong_arity() {
        assert!(matches!(
            BoundingBox::from_query_param("1,2,3"),
            Err(BboxParseError::InvalidFormat(_))
        ));
        assert!(matches!(
            BoundingBox::from_query_param("1,2,3,4,5"),
            Err(BboxParseError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_parse_bbox_non_numeric() {
        assert!(matches!(
            BoundingBox::from_query_param("1,2,three,4"),
            Err(BboxParseError::InvalidNumber(_))
        ));
    }

    #[test]
    fn test_intersects() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 5.0, 15.0, 15.0);
        let c = BoundingBox::new(20.0, 20.0, 30.0, 30.0);

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_to_wkt_is_closed_polygon() {
        let bbox = BoundingBox::new(5.0, 5.0, 6.0, 6.0);
        let wkt = bbox.to_wkt();
        assert!(wkt.starts_with("POLYGON"));
        assert!(wkt.contains("5 5"));
        assert!(wkt.contains("6 6"));
    }
}
