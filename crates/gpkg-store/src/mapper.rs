//! Datasource-agnostic mapping from SQL rows to the feature domain model.

use chrono::{DateTime, NaiveDateTime, Utc};
use ogc_common::{Feature, PrevNextFid, PropertyValue};
use rusqlite::types::ValueRef;
use rusqlite::Rows;

use crate::error::{StoreError, StoreResult};

/// Storage artifacts of the spatial indexes, not feature properties.
const RESERVED_COLUMNS: [&str; 6] = ["minx", "miny", "maxx", "maxy", "min_zoom", "max_zoom"];

/// Synthetic window columns emitted by the pagination query.
const PREV_FID_COLUMN: &str = "prevfid";
const NEXT_FID_COLUMN: &str = "nextfid";

/// Name and declared type of a result column, captured from the prepared
/// statement before iterating rows.
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub name: String,
    pub decl_type: Option<String>,
}

impl ColumnMeta {
    pub fn new(name: &str, decl_type: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            decl_type: decl_type.map(|t| t.to_ascii_lowercase()),
        }
    }

    fn is_datetime(&self) -> bool {
        matches!(
            self.decl_type.as_deref(),
            Some("datetime") | Some("date") | Some("timestamp")
        )
    }

    fn is_boolean(&self) -> bool {
        matches!(self.decl_type.as_deref(), Some("boolean") | Some("bool"))
    }
}

/// Map a SQL result set to features.
///
/// The id column must decode to an integer, the geometry column passes its
/// raw bytes through the decoder, reserved columns are skipped and any other
/// column becomes a property. The synthetic `prevfid`/`nextfid` pair is taken
/// from the first row: the pagination query aligns the window so that the
/// first returned row carries the start fids of the previous and next page.
///
/// Unexpected column types fail the entire response; silent type loss is
/// unacceptable.
pub fn map_rows_to_features(
    rows: &mut Rows<'_>,
    columns: &[ColumnMeta],
    fid_column: &str,
    geometry_column: &str,
    geometry_decoder: fn(&[u8]) -> StoreResult<geojson::Geometry>,
) -> StoreResult<(Vec<Feature>, Option<PrevNextFid>)> {
    let mut features = Vec::new();
    let mut prev_next: Option<PrevNextFid> = None;

    while let Some(row) = rows.next()? {
        let mut feature = Feature::new(0, None);
        let mut row_prev_next = PrevNextFid::default();

        for (idx, column) in columns.iter().enumerate() {
            let value = row.get_ref(idx)?;
            if matches!(value, ValueRef::Null) {
                continue;
            }

            match column.name.as_str() {
                name if name == fid_column => {
                    feature.id = expect_integer(value, &column.name)?;
                }
                name if name == geometry_column => {
                    let ValueRef::Blob(raw) = value else {
                        return Err(unexpected(value, &column.name));
                    };
                    feature.geometry = Some(geometry_decoder(raw)?);
                }
                PREV_FID_COLUMN => row_prev_next.prev = expect_integer(value, &column.name)?,
                NEXT_FID_COLUMN => row_prev_next.next = expect_integer(value, &column.name)?,
                name if RESERVED_COLUMNS.contains(&name) => continue,
                _ => {
                    let mapped = map_property(value, column)?;
                    feature.properties.insert(column.name.clone(), mapped);
                }
            }
        }

        if prev_next.is_none() {
            prev_next = Some(row_prev_next);
        }
        features.push(feature);
    }

    Ok((features, prev_next))
}

fn map_property(value: ValueRef<'_>, column: &ColumnMeta) -> StoreResult<PropertyValue> {
    match value {
        ValueRef::Integer(v) if column.is_boolean() => Ok(PropertyValue::Bool(v != 0)),
        ValueRef::Integer(v) => Ok(PropertyValue::Int(v)),
        ValueRef::Real(v) => Ok(PropertyValue::Float(v)),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            if column.is_datetime() {
                parse_timestamp(&text, &column.name).map(PropertyValue::Timestamp)
            } else {
                Ok(PropertyValue::String(text))
            }
        }
        // byte blobs are materialized as strings, UTF-8 assumed
        ValueRef::Blob(bytes) => Ok(PropertyValue::String(
            String::from_utf8_lossy(bytes).into_owned(),
        )),
        ValueRef::Null => unreachable!("null columns are filtered before dispatch"),
    }
}

fn parse_timestamp(text: &str, column: &str) -> StoreResult<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| StoreError::UnexpectedColumnType {
            column: column.to_string(),
            sql_type: format!("unparseable datetime '{text}'"),
        })
}

fn expect_integer(value: ValueRef<'_>, column: &str) -> StoreResult<i64> {
    match value {
        ValueRef::Integer(v) => Ok(v),
        other => Err(unexpected(other, column)),
    }
}

fn unexpected(value: ValueRef<'_>, column: &str) -> StoreError {
    StoreError::UnexpectedColumnType {
        column: column.to_string(),
        sql_type: format!("{:?}", value.data_type()),
    }
}
