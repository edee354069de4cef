//! Core types for the lookup subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A WGS84 position in degrees.
///
/// Missing positions are modelled as `Option<Coordinate>`, never as `(0, 0)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    /// Returns `None` unless both components are finite.
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        let coord = Self { lat, lon };
        coord.is_valid().then_some(coord)
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }

    pub fn to_radians(self) -> (f64, f64) {
        (self.lat.to_radians(), self.lon.to_radians())
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.5}, {:.5})", self.lat, self.lon)
    }
}

/// `"<city>, <region>"` exactly as supplied; no case or whitespace folding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationKey(String);

impl LocationKey {
    pub fn new(city: &str, region: &str) -> Self {
        Self(format!("{}, {}", city, region))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocationKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A named (or unnamed) landmark returned by the spatial-query endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    pub name: Option<String>,
    #[serde(flatten)]
    pub coordinate: Coordinate,
}

/// Bulk-resolution progress, reported once per key after it resolves.
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    pub done: usize,
    pub total: usize,
    pub key: &'a LocationKey,
}

/// Why a single request attempt failed. Drives the retry loop; never
/// returned from `resolve`.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("invalid API response: {0}")]
    InvalidResponse(String),
    #[error("no match for '{0}'")]
    NoMatch(String),
}
