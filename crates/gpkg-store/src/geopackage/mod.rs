//! GeoPackage datasource implementation.

pub(crate) mod geometry;
mod queries;
mod spatial;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ogc_common::{Cursors, Feature, FeatureCollection, PrevNextFid};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, LoadExtensionGuard, OpenFlags};
use tracing::info;

use crate::datasource::{FeatureDatasource, FeatureOptions};
use crate::error::{StoreError, StoreResult};
use crate::mapper::{map_rows_to_features, ColumnMeta};

pub use queries::{BBOX_SIZE_BIG, SPATIAL_INDEX_SUFFIX};

/// A configured collection to be matched against the GeoPackage contents.
#[derive(Debug, Clone)]
pub struct CollectionRef {
    pub id: String,
    /// Explicit override when the collection id differs from the
    /// `gpkg_contents.identifier`.
    pub datasource_id: Option<String>,
}

/// Options for opening a GeoPackage.
#[derive(Debug, Clone)]
pub struct GeoPackageOptions {
    pub path: PathBuf,
    /// Name of the feature id column, `fid` by convention.
    pub fid_column: String,
    /// Per-query deadline; cancellation propagates to the driver.
    pub query_timeout: Duration,
    /// Connection pool size; bounds read concurrency.
    pub max_connections: u32,
    /// Load the spatialite extension. When false, builtin Rust spatial
    /// functions are registered instead.
    pub spatialite: bool,
}

impl GeoPackageOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fid_column: "fid".to_string(),
            query_timeout: Duration::from_secs(15),
            max_connections: 8,
            spatialite: true,
        }
    }
}

/// Feature table descriptor derived from `gpkg_contents` joined with
/// `gpkg_geometry_columns` at startup.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub table_name: String,
    pub identifier: String,
    pub description: String,
    pub geometry_column: String,
    pub geometry_type: String,
    pub last_change: String,
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub srs_id: i64,
}

/// Read-only, pooled GeoPackage connection serving feature queries.
pub struct GeoPackage {
    pool: Pool<SqliteConnectionManager>,
    fid_column: String,
    query_timeout: Duration,
    feature_table_by_collection: HashMap<String, FeatureTable>,
}

impl GeoPackage {
    /// Open the GeoPackage and validate it against the configured
    /// collections. Fails loudly on a missing table or missing/incorrect
    /// spatial index.
    pub fn connect(options: GeoPackageOptions, collections: &[CollectionRef]) -> StoreResult<Self> {
        if !options.path.exists() {
            return Err(StoreError::Setup(format!(
                "geopackage file does not exist: {}",
                options.path.display()
            )));
        }

        let spatialite = options.spatialite;
        let manager = SqliteConnectionManager::file(&options.path)
            .with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)
            .with_init(move |conn| {
                if spatialite {
                    load_spatialite(conn)
                } else {
                    spatial::register_builtin_functions(conn)
                }
            });
        let pool = Pool::builder()
            .max_size(options.max_connections)
            .build(manager)?;

        let conn = pool.get()?;
        info!("{}", read_driver_metadata(&conn, spatialite)?);

        let feature_table_by_collection = read_gpkg_contents(&conn, collections)?;
        assert_index_on_feature_tables(&conn, &feature_table_by_collection, &options.fid_column)?;
        drop(conn);

        Ok(Self {
            pool,
            fid_column: options.fid_column,
            query_timeout: options.query_timeout,
            feature_table_by_collection,
        })
    }

    /// The resolved feature tables, keyed by collection id.
    pub fn feature_tables(&self) -> &HashMap<String, FeatureTable> {
        &self.feature_table_by_collection
    }

    fn feature_table(&self, collection: &str) -> StoreResult<&FeatureTable> {
        self.feature_table_by_collection
            .get(collection)
            .ok_or_else(|| StoreError::TableNotFound {
                collection: collection.to_string(),
                available: self.feature_table_by_collection.keys().cloned().collect(),
            })
    }

    /// Run a blocking query under the configured deadline. The progress
    /// handler aborts the statement inside SQLite once the deadline passes,
    /// so cancellation reaches the driver rather than just abandoning the
    /// task.
    async fn run_query<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        let timeout = self.query_timeout;

        let task = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            let deadline = Instant::now() + timeout;
            conn.progress_handler(1_000, Some(move || Instant::now() >= deadline));
            let result = f(&conn);
            conn.progress_handler(0, None::<fn() -> bool>);
            result
        });

        match tokio::time::timeout(timeout + Duration::from_secs(1), task).await {
            Err(_) => Err(StoreError::Timeout),
            Ok(Err(join_err)) => Err(StoreError::Setup(format!("query task failed: {join_err}"))),
            Ok(Ok(result)) => result.map_err(|err| match err {
                StoreError::Sql(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::OperationInterrupted =>
                {
                    StoreError::Timeout
                }
                other => other,
            }),
        }
    }
}

#[async_trait]
impl FeatureDatasource for GeoPackage {
    async fn get_features(
        &self,
        collection: &str,
        options: FeatureOptions,
    ) -> StoreResult<(FeatureCollection, Cursors)> {
        let table = self.feature_table(collection)?.clone();
        let fid_column = self.fid_column.clone();
        let checksum = options.cursor.filters_checksum.clone();

        let (features, prev_next) = self
            .run_query(move |conn| query_features(conn, &table, &fid_column, &options))
            .await?;

        let cursors = Cursors::new(prev_next.unwrap_or_default(), &checksum);
        Ok((FeatureCollection::new(features), cursors))
    }

    async fn get_feature(&self, collection: &str, feature_id: i64) -> StoreResult<Option<Feature>> {
        let table = self.feature_table(collection)?.clone();
        let fid_column = self.fid_column.clone();

        let (mut features, _) = self
            .run_query(move |conn| {
                let sql = queries::single_feature_query(&table.table_name, &fid_column);
                let mut stmt = conn.prepare(&sql)?;
                let columns = column_meta(&stmt);
                let mut rows = stmt.query(rusqlite::named_params! { ":fid": feature_id })?;
                map_rows_to_features(
                    &mut rows,
                    &columns,
                    &fid_column,
                    &table.geometry_column,
                    geometry::decode_gpkg_geometry,
                )
            })
            .await?;

        Ok(features.pop())
    }

    fn close(&self) {
        info!("closing geopackage connection pool");
    }
}

fn query_features(
    conn: &Connection,
    table: &FeatureTable,
    fid_column: &str,
    options: &FeatureOptions,
) -> StoreResult<(Vec<Feature>, Option<PrevNextFid>)> {
    let fid = options.cursor.fid;
    let limit = i64::from(options.limit);

    match &options.bbox {
        None => {
            let sql = queries::default_query(&table.table_name, fid_column);
            let mut stmt = conn.prepare(&sql)?;
            let columns = column_meta(&stmt);
            let mut rows = stmt.query(rusqlite::named_params! {
                ":fid": fid,
                ":limit": limit,
            })?;
            map_rows_to_features(
                &mut rows,
                &columns,
                fid_column,
                &table.geometry_column,
                geometry::decode_gpkg_geometry,
            )
        }
        Some(bbox) => {
            let sql = queries::bbox_query(&table.table_name, fid_column, &table.geometry_column);
            let bbox_wkt = bbox.to_wkt();
            let mut stmt = conn.prepare(&sql)?;
            let columns = column_meta(&stmt);
            let mut rows = stmt.query(rusqlite::named_params! {
                ":fid": fid,
                ":limit": limit,
                ":bboxWkt": bbox_wkt,
                ":bboxCrs": options.bbox_crs,
                ":minx": bbox.min_x,
                ":miny": bbox.min_y,
                ":maxx": bbox.max_x,
                ":maxy": bbox.max_y,
            })?;
            map_rows_to_features(
                &mut rows,
                &columns,
                fid_column,
                &table.geometry_column,
                geometry::decode_gpkg_geometry,
            )
        }
    }
}

fn column_meta(stmt: &rusqlite::Statement<'_>) -> Vec<ColumnMeta> {
    stmt.columns()
        .iter()
        .map(|c| ColumnMeta::new(c.name(), c.decl_type()))
        .collect()
}

/// Load the spatialite loadable extension. Expected in the platform library
/// path by default; SPATIALITE_LIBRARY_PATH overrides the directory.
fn load_spatialite(conn: &Connection) -> rusqlite::Result<()> {
    let dir = std::env::var("SPATIALITE_LIBRARY_PATH").unwrap_or_default();
    let library = Path::new(&dir).join("mod_spatialite");
    unsafe {
        let _guard = LoadExtensionGuard::new(conn)?;
        conn.load_extension(library, None)
    }
}

/// Read metadata about the gpkg and the sqlite driver, for the startup log.
fn read_driver_metadata(conn: &Connection, spatialite: bool) -> StoreResult<String> {
    let sqlite: String = conn.query_row("select sqlite_version()", [], |row| row.get(0))?;
    let (spatialite_version, arch): (String, String) = if spatialite {
        conn.query_row(
            "select spatialite_version(), spatialite_target_cpu()",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?
    } else {
        ("builtin".to_string(), std::env::consts::ARCH.to_string())
    };
    let gpkg_version: i64 = conn
        .query_row("pragma user_version", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(format!(
        "geopackage version: {gpkg_version}, sqlite version: {sqlite}, spatialite version: {spatialite_version} on {arch}"
    ))
}

/// Read the `gpkg_contents` table and associate each feature table with a
/// configured collection, matching the `identifier` column or the explicitly
/// configured datasource id.
fn read_gpkg_contents(
    conn: &Connection,
    collections: &[CollectionRef],
) -> StoreResult<HashMap<String, FeatureTable>> {
    let mut stmt = conn.prepare(
        "select
            c.table_name, c.data_type, c.identifier, c.description, c.last_change,
            c.min_x, c.min_y, c.max_x, c.max_y, c.srs_id, gc.column_name, gc.geometry_type_name
        from
            gpkg_contents c join gpkg_geometry_columns gc on c.table_name == gc.table_name
        where
            c.data_type = 'features' and
            c.min_x is not null",
    )?;

    let tables = stmt
        .query_map([], |row| {
            Ok(FeatureTable {
                table_name: row.get(0)?,
                identifier: row.get(2)?,
                description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                last_change: row.get(4)?,
                min_x: row.get(5)?,
                min_y: row.get(6)?,
                max_x: row.get(7)?,
                max_y: row.get(8)?,
                srs_id: row.get(9)?,
                geometry_column: row.get(10)?,
                geometry_type: row.get(11)?,
            })
        })?
        .collect::<Result<Vec<FeatureTable>, _>>()?;

    if tables.is_empty() {
        return Err(StoreError::NoFeatureTables);
    }

    let mut result = HashMap::with_capacity(tables.len());
    if collections.is_empty() {
        for table in tables {
            result.insert(table.identifier.clone(), table);
        }
        return Ok(result);
    }

    for collection in collections {
        let matched = tables.iter().find(|table| {
            table.identifier == collection.id
                || collection
                    .datasource_id
                    .as_deref()
                    .is_some_and(|id| table.identifier == id)
        });
        match matched {
            Some(table) => {
                result.insert(collection.id.clone(), table.clone());
            }
            None => {
                return Err(StoreError::TableNotFound {
                    collection: collection.id.clone(),
                    available: tables.iter().map(|t| t.identifier.clone()).collect(),
                });
            }
        }
    }

    Ok(result)
}

/// Assert that an index named `<table>_spatial_idx` exists on each feature
/// table covering `(fid, minx, maxx, miny, maxy)` in that order.
fn assert_index_on_feature_tables(
    conn: &Connection,
    tables: &HashMap<String, FeatureTable>,
    fid_column: &str,
) -> StoreResult<()> {
    let expected = format!("{fid_column},minx,maxx,miny,maxy");

    for table in tables.values() {
        let index_name = format!("{}{}", table.table_name, SPATIAL_INDEX_SUFFIX);
        let actual: Option<String> = conn.query_row(
            &format!("select group_concat(name) from pragma_index_info('{index_name}')"),
            [],
            |row| row.get(0),
        )?;

        match actual {
            None => {
                return Err(StoreError::MissingIndex {
                    index: index_name,
                    table: table.table_name.clone(),
                })
            }
            Some(actual) if actual != expected => {
                return Err(StoreError::WrongIndexColumns {
                    index: index_name,
                    table: table.table_name.clone(),
                    expected,
                    actual,
                })
            }
            Some(_) => {}
        }
    }

    Ok(())
}
