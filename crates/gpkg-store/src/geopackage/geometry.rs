//! GeoPackage geometry blob decoding.

use geozero::ToGeo;

use crate::error::{StoreError, StoreResult};

/// Decode a GeoPackage geometry blob into a GeoJSON geometry.
///
/// A GeoPackage blob is a fixed header, an optional envelope and the raw
/// WKB payload. The envelope length is encoded in the flags byte.
// cf. https://www.geopackage.org/spec140/index.html#gpb_format
pub fn decode_gpkg_geometry(blob: &[u8]) -> StoreResult<geojson::Geometry> {
    let geometry = decode_gpkg_to_geo(blob)?;
    Ok(geojson::Geometry::new(geojson::Value::from(&geometry)))
}

/// Decode a GeoPackage geometry blob into a geo-types geometry.
pub(crate) fn decode_gpkg_to_geo(blob: &[u8]) -> StoreResult<geo_types::Geometry<f64>> {
    let wkb = gpkg_blob_to_wkb(blob)?;
    geozero::wkb::Wkb(wkb.to_vec())
        .to_geo()
        .map_err(|err| StoreError::Geometry(err.to_string()))
}

/// Strip GeoPackage header and envelope bytes to access the raw WKB.
fn gpkg_blob_to_wkb(blob: &[u8]) -> StoreResult<&[u8]> {
    if blob.len() < 8 || blob[0] != b'G' || blob[1] != b'P' {
        return Err(StoreError::Geometry(
            "blob is not a GeoPackage geometry (missing GP magic)".to_string(),
        ));
    }

    let flags = blob[3];
    let envelope_size: usize = match flags & 0b0000_1110 {
        0b0000_0000 => 0,  // no envelope
        0b0000_0010 => 32, // [minx, maxx, miny, maxy]
        0b0000_0100 => 48, // [minx, maxx, miny, maxy, minz, maxz]
        0b0000_0110 => 48, // [minx, maxx, miny, maxy, minm, maxm]
        0b0000_1000 => 64, // [minx, maxx, miny, maxy, minz, maxz, minm, maxm]
        _ => {
            return Err(StoreError::Geometry(format!(
                "invalid geometry flags: {flags:#04x}"
            )));
        }
    };

    let offset = 8 + envelope_size;
    if blob.len() <= offset {
        return Err(StoreError::Geometry(
            "geometry blob truncated before WKB payload".to_string(),
        ));
    }
    Ok(&blob[offset..])
}

/// Build a GeoPackage blob around little-endian WKB for a 2D point.
/// Test-data helper, mirrors what GIS writers produce.
pub fn encode_gpkg_point(x: f64, y: f64, srs_id: i32) -> Vec<u8> {
    let mut blob = Vec::with_capacity(8 + 21);
    blob.extend_from_slice(&[b'G', b'P', 0x00, 0x01]); // magic, version, LE flags
    blob.extend_from_slice(&srs_id.to_le_bytes());
    blob.push(0x01); // WKB little endian
    blob.extend_from_slice(&1u32.to_le_bytes()); // point
    blob.extend_from_slice(&x.to_le_bytes());
    blob.extend_from_slice(&y.to_le_bytes());
    blob
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_point_blob() {
        let blob = encode_gpkg_point(5.5, 52.1, 28992);
        let geometry = decode_gpkg_geometry(&blob).unwrap();

        match geometry.value {
            geojson::Value::Point(coords) => {
                assert_eq!(coords, vec![5.5, 52.1]);
            }
            other => panic!("expected point, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_missing_magic() {
        let result = decode_gpkg_geometry(&[0x00; 16]);
        assert!(matches!(result, Err(StoreError::Geometry(_))));
    }

    #[test]
    fn test_rejects_invalid_flags() {
        let mut blob = encode_gpkg_point(0.0, 0.0, 4326);
        blob[3] = 0x0A; // invalid envelope indicator
        assert!(matches!(
            decode_gpkg_geometry(&blob),
            Err(StoreError::Geometry(_))
        ));
    }

    #[test]
    fn test_rejects_truncated_blob() {
        let blob = encode_gpkg_point(0.0, 0.0, 4326);
        assert!(matches!(
            decode_gpkg_geometry(&blob[..8]),
            Err(StoreError::Geometry(_))
        ));
    }
}
