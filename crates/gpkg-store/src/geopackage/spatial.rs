//! Builtin spatial SQL functions.
//!
//! The bbox query calls `geomfromtext`, `castautomagic` and `st_intersects`,
//! which spatialite provides as a loadable extension. When the extension is
//! not available (tests, spatialite-less deployments) these Rust
//! implementations are registered on each connection instead, covering
//! exactly the call shapes the query uses.

use geo::Intersects;
use geo_types::Geometry;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use wkt::TryFromWkt;

/// Register the builtin spatial functions on a connection.
pub fn register_builtin_functions(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    // geomfromtext(wkt, srid): the WKT text itself is our geometry carrier
    conn.create_scalar_function("geomfromtext", 2, flags, |ctx| ctx.get::<String>(0))?;

    // castautomagic(blob): the GeoPackage blob passes through unchanged
    conn.create_scalar_function("castautomagic", 1, flags, |ctx| ctx.get::<Vec<u8>>(0))?;

    conn.create_scalar_function("st_intersects", 2, flags, |ctx| {
        let a = geometry_arg(ctx, 0)?;
        let b = geometry_arg(ctx, 1)?;
        Ok(i64::from(a.intersects(&b)))
    })?;

    Ok(())
}

/// Interpret a function argument as a geometry: WKT for text arguments,
/// a GeoPackage blob for blob arguments.
fn geometry_arg(ctx: &Context<'_>, idx: usize) -> rusqlite::Result<Geometry<f64>> {
    match ctx.get_raw(idx) {
        ValueRef::Text(bytes) => {
            let wkt_str = std::str::from_utf8(bytes)
                .map_err(|err| rusqlite::Error::UserFunctionError(Box::new(err)))?;
            Geometry::try_from_wkt_str(wkt_str)
                .map_err(|err| rusqlite::Error::UserFunctionError(err.to_string().into()))
        }
        ValueRef::Blob(blob) => super::geometry::decode_gpkg_to_geo(blob)
            .map_err(|err| rusqlite::Error::UserFunctionError(err.to_string().into())),
        other => Err(rusqlite::Error::UserFunctionError(
            format!("st_intersects: unsupported argument type {:?}", other.data_type()).into(),
        )),
    }
}
