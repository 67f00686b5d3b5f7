//! Shared definitions for the grid adjacency network: grid cells, the edges
//! built between them, and the batch windows the builder walks through.
//!
//! Centroids live in Web Mercator (EPSG:3857) so that distances are planar
//! metres. Edge tracks are stored in WGS 84 (EPSG:4326) as GeoJSON.

use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

/// Spherical Mercator earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

// ── Points ───────────────────────────────────────────────────────────────────

/// A position in EPSG:3857 metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanarPoint {
    pub x: f64,
    pub y: f64,
}

/// A position in EPSG:4326 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl PlanarPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance in the planar CRS.
    pub fn distance_to(&self, other: &PlanarPoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Inverse spherical Mercator.
    pub fn to_geographic(&self) -> GeoPoint {
        let lon = (self.x / EARTH_RADIUS_M).to_degrees();
        let lat = (2.0 * (self.y / EARTH_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2)
            .to_degrees();
        GeoPoint { lon, lat }
    }
}

// ── GridCell ─────────────────────────────────────────────────────────────────

/// A precomputed grid cell. Read-only input to the builder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub id: i64,
    pub centroid: PlanarPoint,
}

impl GridCell {
    pub fn new(id: i64, x: f64, y: f64) -> Self {
        Self { id, centroid: PlanarPoint::new(x, y) }
    }
}

// ── Track ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum TrackKind {
    LineString,
}

/// GeoJSON `LineString` in EPSG:4326, `[lon, lat]` per vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    #[serde(rename = "type")]
    kind: TrackKind,
    pub coordinates: Vec<[f64; 2]>,
}

/// Axis-aligned bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl Track {
    /// Two-point line from `a` to `b`, reprojected to geographic coordinates.
    pub fn between(a: &PlanarPoint, b: &PlanarPoint) -> Self {
        let (ga, gb) = (a.to_geographic(), b.to_geographic());
        Self {
            kind: TrackKind::LineString,
            coordinates: vec![[ga.lon, ga.lat], [gb.lon, gb.lat]],
        }
    }

    /// Fails on a non-finite coordinate, which JSON cannot represent.
    pub fn to_geojson(&self) -> Result<String, serde_json::Error> {
        if !self.is_finite() {
            return Err(serde::ser::Error::custom("track has a non-finite coordinate"));
        }
        serde_json::to_string(self)
    }

    pub fn is_finite(&self) -> bool {
        self.coordinates.iter().flatten().all(|v| v.is_finite())
    }

    pub fn from_geojson(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// `None` for a line without vertices.
    pub fn bbox(&self) -> Option<BoundingBox> {
        let first = self.coordinates.first()?;
        let init = BoundingBox {
            min_lon: first[0],
            max_lon: first[0],
            min_lat: first[1],
            max_lat: first[1],
        };
        Some(self.coordinates.iter().fold(init, |b, c| BoundingBox {
            min_lon: b.min_lon.min(c[0]),
            max_lon: b.max_lon.max(c[0]),
            min_lat: b.min_lat.min(c[1]),
            max_lat: b.max_lat.max(c[1]),
        }))
    }
}

// ── AdjacencyEdge ────────────────────────────────────────────────────────────

/// One undirected edge of the grid network, stored lower id → higher id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjacencyEdge {
    pub source_grid_id: i64,
    pub target_grid_id: i64,
    pub track: Track,
    /// Planar distance between the two centroids.
    pub cost: f64,
}

impl AdjacencyEdge {
    /// Returns `None` unless `source.id < target.id`.
    pub fn between(source: &GridCell, target: &GridCell) -> Option<Self> {
        if source.id >= target.id {
            return None;
        }
        Some(Self {
            source_grid_id: source.id,
            target_grid_id: target.id,
            track: Track::between(&source.centroid, &target.centroid),
            cost: source.centroid.distance_to(&target.centroid),
        })
    }
}

// ── Batch windows ────────────────────────────────────────────────────────────

/// Inclusive range of source grid ids processed as one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchWindow {
    pub start_id: i64,
    pub end_id: i64,
}

impl BatchWindow {
    pub fn contains(&self, id: i64) -> bool {
        (self.start_id..=self.end_id).contains(&id)
    }

    /// Number of ids covered.
    pub fn width(&self) -> u64 {
        self.end_id.abs_diff(self.start_id) + 1
    }
}

impl std::fmt::Display for BatchWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}–{}", self.start_id, self.end_id)
    }
}

/// Splits `[start_id, max_id]` into consecutive windows of `batch_size` ids.
/// The last window may be narrower. Yields nothing when `start_id > max_id`.
#[derive(Debug, Clone)]
pub struct BatchWindows {
    next_start: Option<i64>,
    max_id: i64,
    batch_size: i64,
}

impl BatchWindows {
    pub fn new(start_id: i64, max_id: i64, batch_size: NonZeroU32) -> Self {
        Self {
            next_start: Some(start_id),
            max_id,
            batch_size: i64::from(batch_size.get()),
        }
    }
}

impl Iterator for BatchWindows {
    type Item = BatchWindow;

    fn next(&mut self) -> Option<BatchWindow> {
        let start_id = self.next_start?;
        if start_id > self.max_id {
            self.next_start = None;
            return None;
        }
        let end_id = start_id.saturating_add(self.batch_size - 1).min(self.max_id);
        self.next_start = end_id.checked_add(1);
        Some(BatchWindow { start_id, end_id })
    }
}
