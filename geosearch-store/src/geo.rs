//! Geographic positions and the grid spatial index
//!
//! Distances are great-circle (haversine) on a spherical Earth. The grid
//! buckets positions into fixed lat/lon cells so a radius query only has to
//! look at the cells overlapping the circle's bounding box.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{Result, StoreError};
use crate::record::RecordId;

/// Mean Earth radius in meters (IUGG)
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Meters per degree of latitude
const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

/// A validated latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Create a point, rejecting out-of-range or non-finite coordinates
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        let point = Self { lat, lon };
        point.validate()?;
        Ok(point)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.lat.is_finite() || !self.lon.is_finite() {
            return Err(StoreError::validation(format!(
                "coordinates must be finite, got ({}, {})",
                self.lat, self.lon
            )));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(StoreError::validation(format!(
                "latitude {} out of range [-90, 90]",
                self.lat
            )));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(StoreError::validation(format!(
                "longitude {} out of range [-180, 180]",
                self.lon
            )));
        }
        Ok(())
    }

    /// Great-circle distance in meters
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        haversine_m(self, other)
    }
}

/// Haversine distance between two points in meters
pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

type Cell = (i32, i32);

/// In-memory lat/lon grid over record positions
#[derive(Debug)]
pub struct SpatialGrid {
    cell_degrees: f64,
    columns: i32,
    cells: HashMap<Cell, HashSet<RecordId>>,
    positions: HashMap<RecordId, GeoPoint>,
}

impl SpatialGrid {
    pub fn new(cell_degrees: f64) -> Self {
        let cell_degrees = if cell_degrees.is_finite() && cell_degrees > 0.0 {
            cell_degrees.min(90.0)
        } else {
            0.1
        };
        Self {
            cell_degrees,
            columns: (360.0 / cell_degrees).ceil() as i32,
            cells: HashMap::new(),
            positions: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn row(&self, lat: f64) -> i32 {
        ((lat + 90.0) / self.cell_degrees).floor() as i32
    }

    fn column(&self, lon: f64) -> i32 {
        (((lon + 180.0) / self.cell_degrees).floor() as i32).rem_euclid(self.columns)
    }

    fn cell_of(&self, point: &GeoPoint) -> Cell {
        (self.row(point.lat), self.column(point.lon))
    }

    /// Insert or move a record; `None` removes it from the grid
    pub fn upsert(&mut self, id: &RecordId, position: Option<GeoPoint>) {
        self.remove(id);
        if let Some(point) = position {
            let cell = self.cell_of(&point);
            self.cells.entry(cell).or_default().insert(id.clone());
            self.positions.insert(id.clone(), point);
        }
    }

    pub fn remove(&mut self, id: &RecordId) {
        if let Some(old) = self.positions.remove(id) {
            let cell = self.cell_of(&old);
            if let Some(members) = self.cells.get_mut(&cell) {
                members.remove(id);
                if members.is_empty() {
                    self.cells.remove(&cell);
                }
            }
        }
    }

    /// Records within `radius_m` of `origin`, with their distance
    pub fn within(&self, origin: &GeoPoint, radius_m: f64) -> Vec<(RecordId, f64)> {
        let candidates = self.candidate_ids(origin, radius_m);
        let mut hits = Vec::new();
        for id in candidates {
            if let Some(point) = self.positions.get(id) {
                let distance = haversine_m(origin, point);
                if distance <= radius_m {
                    hits.push((id.clone(), distance));
                }
            }
        }
        hits
    }

    /// Ids in the cells overlapping the radius' bounding box
    fn candidate_ids<'a>(&'a self, origin: &GeoPoint, radius_m: f64) -> Vec<&'a RecordId> {
        let dlat = radius_m / METERS_PER_DEGREE;
        let lat_min = origin.lat - dlat;
        let lat_max = origin.lat + dlat;

        // Circle reaches a pole: every longitude is in range
        if lat_min <= -90.0 || lat_max >= 90.0 {
            return self.positions.keys().collect();
        }

        let widest = lat_min.abs().max(lat_max.abs()).to_radians().cos();
        let dlon = dlat / widest.max(1e-9);
        if dlon >= 180.0 {
            return self.positions.keys().collect();
        }

        let row_lo = self.row(lat_min);
        let row_hi = self.row(lat_max);
        let col_lo = ((origin.lon - dlon + 180.0) / self.cell_degrees).floor() as i64;
        let col_hi = ((origin.lon + dlon + 180.0) / self.cell_degrees).floor() as i64;

        let cell_count = (row_hi - row_lo + 1) as i64 * (col_hi - col_lo + 1);
        if cell_count as usize > self.cells.len() {
            // Cheaper to walk the occupied cells than the covering box
            return self
                .cells
                .iter()
                .filter(|((row, col), _)| {
                    *row >= row_lo && *row <= row_hi && self.column_in(*col, col_lo, col_hi)
                })
                .flat_map(|(_, members)| members.iter())
                .collect();
        }

        let mut ids = Vec::new();
        let mut seen_columns = HashSet::new();
        for raw in col_lo..=col_hi {
            let col = raw.rem_euclid(self.columns as i64) as i32;
            if !seen_columns.insert(col) {
                continue;
            }
            for row in row_lo..=row_hi {
                if let Some(members) = self.cells.get(&(row, col)) {
                    ids.extend(members.iter());
                }
            }
        }
        ids
    }

    fn column_in(&self, col: i32, lo: i64, hi: i64) -> bool {
        if hi - lo + 1 >= self.columns as i64 {
            return true;
        }
        let cols = self.columns as i64;
        let lo_w = lo.rem_euclid(cols);
        let hi_w = hi.rem_euclid(cols);
        let col = col as i64;
        if lo_w <= hi_w {
            col >= lo_w && col <= hi_w
        } else {
            col >= lo_w || col <= hi_w
        }
    }
}
