// grid-network-builder/src/spatial.rs
// Spatial primitives exposed to SQL as deterministic scalar functions.
// Registered on every connection the store opens.

use grid_schema::{BoundingBox, PlanarPoint, Track};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::{Connection, Error, Result};

// Innocuous: the track index triggers call these.
const FLAGS: FunctionFlags = FunctionFlags::SQLITE_UTF8
    .union(FunctionFlags::SQLITE_DETERMINISTIC)
    .union(FunctionFlags::SQLITE_INNOCUOUS);

/// Registers:
///
/// | function | returns |
/// |----------|---------|
/// | `st_distance(x1, y1, x2, y2)` | planar distance |
/// | `st_dwithin(x1, y1, x2, y2, d)` | 1 when distance ≤ d |
/// | `st_makeline_4326(x1, y1, x2, y2)` | GeoJSON line in EPSG:4326 |
/// | `st_xmin/st_xmax/st_ymin/st_ymax(track)` | bounding box of a GeoJSON line |
pub fn register_spatial_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function("st_distance", 4, FLAGS, |ctx| {
        let (a, b) = points(ctx)?;
        Ok(a.distance_to(&b))
    })?;
    conn.create_scalar_function("st_dwithin", 5, FLAGS, |ctx| {
        let (a, b) = points(ctx)?;
        let max: f64 = ctx.get(4)?;
        Ok(a.distance_to(&b) <= max)
    })?;
    conn.create_scalar_function("st_makeline_4326", 4, FLAGS, |ctx| {
        let (a, b) = points(ctx)?;
        Track::between(&a, &b)
            .to_geojson()
            .map_err(|e| Error::UserFunctionError(Box::new(e)))
    })?;
    conn.create_scalar_function("st_xmin", 1, FLAGS, |ctx| Ok(track_bbox(ctx)?.min_lon))?;
    conn.create_scalar_function("st_xmax", 1, FLAGS, |ctx| Ok(track_bbox(ctx)?.max_lon))?;
    conn.create_scalar_function("st_ymin", 1, FLAGS, |ctx| Ok(track_bbox(ctx)?.min_lat))?;
    conn.create_scalar_function("st_ymax", 1, FLAGS, |ctx| Ok(track_bbox(ctx)?.max_lat))?;
    Ok(())
}

fn points(ctx: &Context<'_>) -> Result<(PlanarPoint, PlanarPoint)> {
    Ok((
        PlanarPoint::new(ctx.get(0)?, ctx.get(1)?),
        PlanarPoint::new(ctx.get(2)?, ctx.get(3)?),
    ))
}

fn track_bbox(ctx: &Context<'_>) -> Result<BoundingBox> {
    let text: String = ctx.get(0)?;
    let track = Track::from_geojson(&text).map_err(|e| Error::UserFunctionError(Box::new(e)))?;
    track
        .bbox()
        .ok_or_else(|| Error::UserFunctionError("track has no vertices".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        register_spatial_functions(&conn).unwrap();
        conn
    }

    #[test]
    fn distance_and_dwithin() {
        let conn = conn();
        let d: f64 = conn
            .query_row("SELECT st_distance(0, 0, 3000, 4000)", [], |r| r.get(0))
            .unwrap();
        assert!((d - 5000.0).abs() < 1e-9);

        let inside: bool = conn
            .query_row("SELECT st_dwithin(0, 0, 3000, 4000, 5000)", [], |r| r.get(0))
            .unwrap();
        let outside: bool = conn
            .query_row("SELECT st_dwithin(0, 0, 3000, 4000, 4999.9)", [], |r| r.get(0))
            .unwrap();
        assert!(inside);
        assert!(!outside);
    }

    #[test]
    fn makeline_round_trips_through_bbox() {
        let conn = conn();
        let (json, xmin, xmax, ymin, ymax): (String, f64, f64, f64, f64) = conn
            .query_row(
                "SELECT t, st_xmin(t), st_xmax(t), st_ymin(t), st_ymax(t)
                 FROM (SELECT st_makeline_4326(0, 0, 111319.4908, -111325.1428) AS t)",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .unwrap();
        assert!(json.starts_with(r#"{"type":"LineString""#));
        assert!(xmin.abs() < 1e-9);
        assert!((xmax - 1.0).abs() < 1e-6);
        assert!((ymin + 1.0).abs() < 1e-4);
        assert!(ymax.abs() < 1e-9);
    }

    #[test]
    fn malformed_track_is_an_error() {
        let conn = conn();
        let res: Result<f64> = conn.query_row("SELECT st_xmin('not json')", [], |r| r.get(0));
        assert!(res.is_err());
    }

    #[test]
    fn null_coordinate_is_an_error() {
        let conn = conn();
        let res: Result<f64> =
            conn.query_row("SELECT st_distance(NULL, 0, 1, 1)", [], |r| r.get(0));
        assert!(res.is_err());
    }

    #[test]
    fn infinite_endpoint_cannot_make_a_line() {
        let conn = conn();
        let res: Result<String> =
            conn.query_row("SELECT st_makeline_4326(1e999, 0, 0, 0)", [], |r| r.get(0));
        assert!(matches!(res, Err(Error::UserFunctionError(_))));
    }
}
