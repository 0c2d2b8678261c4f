//! End-to-end pagination tests against a generated GeoPackage.
//!
//! The test database is written with plain rusqlite and opened through the
//! datasource with builtin spatial functions, so the suite runs without the
//! spatialite extension installed.

use std::path::Path;

use gpkg_store::{CollectionRef, FeatureDatasource, FeatureOptions, GeoPackage, GeoPackageOptions};
use ogc_common::{BoundingBox, DecodedCursor, PropertyValue};
use rusqlite::Connection;
use tempfile::TempDir;

const CHECKSUM: &[u8] = b"qp-checksum";

/// Write a minimal but schema-correct GeoPackage with `count` point
/// features at (i, i) for fid i.
fn create_test_gpkg(path: &Path, count: i64, with_index: bool) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "create table gpkg_contents (
            table_name text not null primary key,
            data_type text not null,
            identifier text unique,
            description text default '',
            last_change datetime not null default (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            min_x double, min_y double, max_x double, max_y double,
            srs_id integer
        );
        create table gpkg_geometry_columns (
            table_name text not null,
            column_name text not null,
            geometry_type_name text not null,
            srs_id integer not null,
            z tinyint not null,
            m tinyint not null
        );
        create table addresses (
            fid integer primary key,
            geom blob,
            minx real, miny real, maxx real, maxy real,
            name text,
            built datetime
        );
        create virtual table rtree_addresses_geom using rtree(id, minx, maxx, miny, maxy);",
    )
    .unwrap();

    if with_index {
        conn.execute_batch(
            "create index addresses_spatial_idx on addresses(fid, minx, maxx, miny, maxy);",
        )
        .unwrap();
    }

    conn.execute(
        "insert into gpkg_contents (table_name, data_type, identifier, min_x, min_y, max_x, max_y, srs_id)
         values ('addresses', 'features', 'addresses', 0, 0, ?1, ?1, 28992)",
        [count as f64],
    )
    .unwrap();
    conn.execute(
        "insert into gpkg_geometry_columns values ('addresses', 'geom', 'POINT', 28992, 0, 0)",
        [],
    )
    .unwrap();

    conn.execute_batch("begin").unwrap();
    for fid in 1..=count {
        let coord = fid as f64;
        let blob = encode_point(coord, coord);
        conn.execute(
            "insert into addresses (fid, geom, minx, miny, maxx, maxy, name, built)
             values (?1, ?2, ?3, ?3, ?3, ?3, ?4, '2021-06-01T00:00:00Z')",
            rusqlite::params![fid, blob, coord, format!("addr {fid}")],
        )
        .unwrap();
        conn.execute(
            "insert into rtree_addresses_geom values (?1, ?2, ?2, ?2, ?2)",
            rusqlite::params![fid, coord],
        )
        .unwrap();
    }
    conn.execute_batch("commit").unwrap();
}

/// GeoPackage point blob: GP header (little-endian, no envelope) + WKB.
fn encode_point(x: f64, y: f64) -> Vec<u8> {
    let mut blob = vec![b'G', b'P', 0x00, 0x01];
    blob.extend_from_slice(&28992i32.to_le_bytes());
    blob.push(0x01);
    blob.extend_from_slice(&1u32.to_le_bytes());
    blob.extend_from_slice(&x.to_le_bytes());
    blob.extend_from_slice(&y.to_le_bytes());
    blob
}

fn open_datasource(dir: &TempDir, count: i64) -> GeoPackage {
    let path = dir.path().join("test.gpkg");
    create_test_gpkg(&path, count, true);

    let mut options = GeoPackageOptions::new(&path);
    options.spatialite = false;
    GeoPackage::connect(
        options,
        &[CollectionRef {
            id: "addresses".to_string(),
            datasource_id: None,
        }],
    )
    .unwrap()
}

fn page_options(fid: i64, limit: u32, bbox: Option<BoundingBox>) -> FeatureOptions {
    FeatureOptions {
        cursor: DecodedCursor {
            fid,
            filters_checksum: CHECKSUM.to_vec(),
        },
        limit,
        bbox,
        bbox_crs: 28992,
    }
}

#[tokio::test]
async fn test_first_page_and_next_cursor() {
    let dir = TempDir::new().unwrap();
    let ds = open_datasource(&dir, 10);

    let (fc, cursors) = ds
        .get_features("addresses", page_options(0, 2, None))
        .await
        .unwrap();

    assert_eq!(fc.number_returned, 2);
    let fids: Vec<i64> = fc.features.iter().map(|f| f.id).collect();
    assert_eq!(fids, vec![1, 2]);
    assert!(cursors.has_next);
    assert!(!cursors.has_prev);
    assert_eq!(cursors.next.decode(CHECKSUM).fid, 3);
}

#[tokio::test]
async fn test_second_page_has_prev_cursor() {
    let dir = TempDir::new().unwrap();
    let ds = open_datasource(&dir, 10);

    let (fc, cursors) = ds
        .get_features("addresses", page_options(3, 2, None))
        .await
        .unwrap();

    let fids: Vec<i64> = fc.features.iter().map(|f| f.id).collect();
    assert_eq!(fids, vec![3, 4]);
    assert!(cursors.has_prev);
    assert_eq!(cursors.prev.decode(CHECKSUM).fid, 1);
    assert_eq!(cursors.next.decode(CHECKSUM).fid, 5);
}

#[tokio::test]
async fn test_stale_cursor_resets_to_first_page() {
    let dir = TempDir::new().unwrap();
    let ds = open_datasource(&dir, 10);

    // a next-cursor obtained under some other filters
    let (_, cursors) = ds
        .get_features("addresses", page_options(0, 2, None))
        .await
        .unwrap();
    let stale = cursors.next.decode(b"other-filters");
    assert_eq!(stale.fid, 0);

    let (fc, _) = ds
        .get_features(
            "addresses",
            FeatureOptions {
                cursor: stale,
                limit: 2,
                bbox: None,
                bbox_crs: 28992,
            },
        )
        .await
        .unwrap();
    assert_eq!(fc.features[0].id, 1);
}

#[tokio::test]
async fn test_paging_covers_whole_collection_without_gaps() {
    let dir = TempDir::new().unwrap();
    let ds = open_datasource(&dir, 10);

    let mut seen = Vec::new();
    let mut cursor_fid = 0;
    loop {
        let (fc, cursors) = ds
            .get_features("addresses", page_options(cursor_fid, 3, None))
            .await
            .unwrap();
        for feature in &fc.features {
            // strictly ascending across pages
            assert!(seen.last().map_or(true, |last| *last < feature.id));
            seen.push(feature.id);
        }
        if !cursors.has_next {
            break;
        }
        cursor_fid = cursors.next.decode(CHECKSUM).fid;
    }

    assert_eq!(seen, (1..=10).collect::<Vec<i64>>());
}

#[tokio::test]
async fn test_bbox_filters_and_pages_in_fid_order() {
    let dir = TempDir::new().unwrap();
    let ds = open_datasource(&dir, 10);

    let bbox = BoundingBox::new(4.5, 4.5, 6.5, 6.5);
    let (fc, cursors) = ds
        .get_features("addresses", page_options(0, 1, Some(bbox)))
        .await
        .unwrap();

    assert_eq!(fc.features.len(), 1);
    assert_eq!(fc.features[0].id, 5);
    assert!(cursors.has_next);
    let next = cursors.next.decode(CHECKSUM).fid;
    assert_eq!(next, 6);

    let (fc, cursors) = ds
        .get_features("addresses", page_options(next, 1, Some(bbox)))
        .await
        .unwrap();
    assert_eq!(fc.features[0].id, 6);
    assert!(cursors.has_prev);
    assert_eq!(cursors.prev.decode(CHECKSUM).fid, 5);
}

#[tokio::test]
async fn test_bbox_pages_match_reference_intersection() {
    let dir = TempDir::new().unwrap();
    let ds = open_datasource(&dir, 10);

    let bbox = BoundingBox::new(2.5, 2.5, 7.5, 7.5);

    // reference result computed without index hints: every feature whose
    // own bounds intersect the filter window
    let expected: Vec<i64> = (1..=10)
        .filter(|fid| {
            let coord = *fid as f64;
            bbox.intersects(&BoundingBox::new(coord, coord, coord, coord))
        })
        .collect();

    let mut actual = Vec::new();
    let mut cursor_fid = 0;
    loop {
        let (fc, cursors) = ds
            .get_features("addresses", page_options(cursor_fid, 2, Some(bbox)))
            .await
            .unwrap();
        actual.extend(fc.features.iter().map(|f| f.id));
        if !cursors.has_next {
            break;
        }
        cursor_fid = cursors.next.decode(CHECKSUM).fid;
    }

    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_huge_bbox_takes_the_compound_index_arm() {
    let dir = TempDir::new().unwrap();
    // above the 10 000 candidate cutoff the query switches from the R-tree
    // to the compound index; results must be identical in shape
    let ds = open_datasource(&dir, 10_050);

    let bbox = BoundingBox::new(0.0, 0.0, 20_000.0, 20_000.0);
    let (fc, cursors) = ds
        .get_features("addresses", page_options(0, 3, Some(bbox)))
        .await
        .unwrap();

    let fids: Vec<i64> = fc.features.iter().map(|f| f.id).collect();
    assert_eq!(fids, vec![1, 2, 3]);
    assert!(cursors.has_next);
    assert_eq!(cursors.next.decode(CHECKSUM).fid, 4);
}

#[tokio::test]
async fn test_reversed_bbox_is_empty_not_an_error() {
    let dir = TempDir::new().unwrap();
    let ds = open_datasource(&dir, 10);

    let bbox = BoundingBox::new(6.5, 6.5, 4.5, 4.5);
    let (fc, cursors) = ds
        .get_features("addresses", page_options(0, 5, Some(bbox)))
        .await
        .unwrap();

    assert_eq!(fc.number_returned, 0);
    assert!(!cursors.has_next);
    assert!(!cursors.has_prev);
}

#[tokio::test]
async fn test_get_feature_by_id() {
    let dir = TempDir::new().unwrap();
    let ds = open_datasource(&dir, 10);

    let feature = ds.get_feature("addresses", 4).await.unwrap().unwrap();
    assert_eq!(feature.id, 4);
    assert_eq!(
        feature.properties["name"],
        PropertyValue::String("addr 4".to_string())
    );
    assert!(matches!(
        feature.properties["built"],
        PropertyValue::Timestamp(_)
    ));
    assert!(feature.geometry.is_some());

    let missing = ds.get_feature("addresses", 99).await.unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_unknown_collection_is_an_error() {
    let dir = TempDir::new().unwrap();
    let ds = open_datasource(&dir, 3);

    let result = ds.get_features("unknown", page_options(0, 5, None)).await;
    assert!(matches!(
        result,
        Err(gpkg_store::StoreError::TableNotFound { .. })
    ));
}

#[tokio::test]
async fn test_missing_spatial_index_fails_startup() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("noindex.gpkg");
    create_test_gpkg(&path, 3, false);

    let mut options = GeoPackageOptions::new(&path);
    options.spatialite = false;
    let result = GeoPackage::connect(
        options,
        &[CollectionRef {
            id: "addresses".to_string(),
            datasource_id: None,
        }],
    );

    assert!(matches!(
        result,
        Err(gpkg_store::StoreError::MissingIndex { .. })
    ));
}

#[tokio::test]
async fn test_unmatched_collection_fails_startup() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.gpkg");
    create_test_gpkg(&path, 3, true);

    let mut options = GeoPackageOptions::new(&path);
    options.spatialite = false;
    let result = GeoPackage::connect(
        options,
        &[CollectionRef {
            id: "parcels".to_string(),
            datasource_id: None,
        }],
    );

    assert!(matches!(
        result,
        Err(gpkg_store::StoreError::TableNotFound { .. })
    ));
}

#[tokio::test]
async fn test_datasource_id_override_matches_table() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.gpkg");
    create_test_gpkg(&path, 3, true);

    let mut options = GeoPackageOptions::new(&path);
    options.spatialite = false;
    let ds = GeoPackage::connect(
        options,
        &[CollectionRef {
            id: "my-addresses".to_string(),
            datasource_id: Some("addresses".to_string()),
        }],
    )
    .unwrap();

    let (fc, _) = ds
        .get_features("my-addresses", page_options(0, 2, None))
        .await
        .unwrap();
    assert_eq!(fc.number_returned, 2);
}

#[tokio::test]
async fn test_limit_zero_yields_empty_page() {
    let dir = TempDir::new().unwrap();
    let ds = open_datasource(&dir, 10);

    let (fc, cursors) = ds
        .get_features("addresses", page_options(0, 0, None))
        .await
        .unwrap();
    assert_eq!(fc.number_returned, 0);
    assert!(!cursors.has_next);
}
