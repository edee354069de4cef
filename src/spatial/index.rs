//! Great-circle nearest-neighbor index over a fixed coordinate set.
//!
//! Points are stored twice: as radians for the haversine distance, and as
//! unit-sphere Cartesian vectors for the R-tree. Chord length is monotonic in
//! great-circle distance, so the tree's nearest point is the haversine
//! nearest point.

use crate::lookup::Coordinate;
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean Earth radius used to scale unit-sphere distances.
pub const EARTH_RADIUS_MILES: f64 = 3958.8;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("cannot build a spatial index over zero coordinates")]
    EmptyInput,
    #[error("coordinate #{0} is not finite")]
    InvalidCoordinate(usize),
    #[error("index artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("index artifact codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Unit-sphere position of a point given in radians.
fn unit_vector(lat: f64, lon: f64) -> [f64; 3] {
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();
    [cos_lat * cos_lon, cos_lat * sin_lon, sin_lat]
}

/// Central angle between two radian positions (haversine formula).
fn central_angle(a: (f64, f64), b: (f64, f64)) -> f64 {
    let half_dlat = (b.0 - a.0) / 2.0;
    let half_dlon = (b.1 - a.1) / 2.0;
    let h = half_dlat.sin().powi(2) + a.0.cos() * b.0.cos() * half_dlon.sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}

/// Great-circle distance in miles.
pub fn haversine_miles(a: &Coordinate, b: &Coordinate) -> f64 {
    central_angle(a.to_radians(), b.to_radians()) * EARTH_RADIUS_MILES
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IndexedPoint {
    idx: usize,
    lat_rad: f64,
    lon_rad: f64,
    xyz: [f64; 3],
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.xyz)
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 3]) -> f64 {
        self.xyz
            .iter()
            .zip(point.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }
}

/// Nearest-neighbor index built from an ordered coordinate sequence.
#[derive(Serialize, Deserialize)]
pub struct SpatialIndex {
    tree: RTree<IndexedPoint>,
    coords: Vec<Coordinate>,
}

impl fmt::Debug for SpatialIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpatialIndex").field("points", &self.coords.len()).finish()
    }
}

impl SpatialIndex {
    /// Build over `coords`. Fails on empty input; callers filter first.
    pub fn build(coords: &[Coordinate]) -> Result<Self, IndexError> {
        if coords.is_empty() {
            return Err(IndexError::EmptyInput);
        }
        let points = coords
            .iter()
            .enumerate()
            .map(|(idx, c)| {
                if !c.is_valid() {
                    return Err(IndexError::InvalidCoordinate(idx));
                }
                let (lat_rad, lon_rad) = c.to_radians();
                Ok(IndexedPoint {
                    idx,
                    lat_rad,
                    lon_rad,
                    xyz: unit_vector(lat_rad, lon_rad),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            tree: RTree::bulk_load(points),
            coords: coords.to_vec(),
        })
    }

    /// Distance in miles to the nearest indexed point and that point's
    /// position in the build sequence. `(NaN, None)` for a non-finite query.
    pub fn nearest(&self, point: &Coordinate) -> (f64, Option<usize>) {
        if !point.is_valid() {
            return (f64::NAN, None);
        }
        let (lat, lon) = point.to_radians();
        match self.tree.nearest_neighbor(&unit_vector(lat, lon)) {
            Some(p) => (
                central_angle((lat, lon), (p.lat_rad, p.lon_rad)) * EARTH_RADIUS_MILES,
                Some(p.idx),
            ),
            None => (f64::NAN, None),
        }
    }

    /// Original degree coordinates, in build order.
    pub fn coords(&self) -> &[Coordinate] {
        &self.coords
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }
}

/// Query an optional index; a missing index answers `(NaN, None)`.
pub fn query(index: Option<&SpatialIndex>, point: &Coordinate) -> (f64, Option<usize>) {
    match index {
        Some(index) => index.nearest(point),
        None => (f64::NAN, None),
    }
}
