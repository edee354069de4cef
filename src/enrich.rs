//! Per-listing proximity enrichment.
//!
//! Builds one index over all valid city centers (key `"city_centers"`) and one
//! per city over its valid landmarks, then answers two nearest-neighbor
//! queries per row.

use crate::lookup::{Coordinate, LocationKey, PointOfInterest};
use crate::spatial::{query, IndexError, IndexStore, SpatialIndex};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Cache key of the shared city-center index.
pub const CITY_CENTERS_KEY: &str = "city_centers";

/// The fields enrichment needs from a listing row.
pub trait ListingRow {
    /// `None` when the row has no usable position.
    fn coordinate(&self) -> Option<Coordinate>;
    fn city(&self) -> &str;
    fn region(&self) -> &str;

    fn location_key(&self) -> LocationKey {
        LocationKey::new(self.city(), self.region())
    }
}

/// Minimal in-memory listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing {
    pub latitude: f64,
    pub longitude: f64,
    pub city: String,
    pub region: String,
}

impl ListingRow for Listing {
    fn coordinate(&self) -> Option<Coordinate> {
        Coordinate::new(self.latitude, self.longitude)
    }

    fn city(&self) -> &str {
        &self.city
    }

    fn region(&self) -> &str {
        &self.region
    }
}

/// A listing plus its three derived columns.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedRow<R> {
    #[serde(flatten)]
    pub row: R,
    pub nearest_city_center_miles: f64,
    pub nearest_landmark_miles: f64,
    pub nearest_landmark_name: Option<String>,
}

/// Valid landmarks of one city with their index (`None` when there are none).
struct CityLandmarks {
    index: Option<SpatialIndex>,
    names: Vec<Option<String>>,
}

pub struct Enricher<'a> {
    store: &'a IndexStore,
}

impl<'a> Enricher<'a> {
    pub fn new(store: &'a IndexStore) -> Self {
        Self { store }
    }

    /// City-center index over valid entries, plus the keys that contributed.
    fn city_center_index(
        &self,
        centers: &BTreeMap<LocationKey, Option<Coordinate>>,
    ) -> Result<(Option<SpatialIndex>, HashSet<LocationKey>), IndexError> {
        let (keys, coords): (HashSet<_>, Vec<_>) = centers
            .iter()
            .filter_map(|(key, coord)| coord.filter(Coordinate::is_valid).map(|c| (key.clone(), c)))
            .unzip();
        if coords.is_empty() {
            return Ok((None, keys));
        }
        let index = self.store.load_or_build(&coords, CITY_CENTERS_KEY)?;
        Ok((Some(index), keys))
    }

    fn landmark_indexes(
        &self,
        landmarks: &BTreeMap<LocationKey, Vec<PointOfInterest>>,
    ) -> Result<BTreeMap<LocationKey, CityLandmarks>, IndexError> {
        let mut out = BTreeMap::new();
        for (key, pois) in landmarks {
            let (coords, names): (Vec<_>, Vec<_>) = pois
                .iter()
                .filter(|p| p.coordinate.is_valid())
                .map(|p| (p.coordinate, p.name.clone()))
                .unzip();
            let index = if coords.is_empty() {
                None
            } else {
                Some(self.store.load_or_build(&coords, key.as_str())?)
            };
            out.insert(key.clone(), CityLandmarks { index, names });
        }
        Ok(out)
    }

    /// Append the derived columns to every row, preserving order. `progress`
    /// receives `(rows done, total)`.
    pub fn enrich<R, F>(
        &self,
        rows: Vec<R>,
        centers: &BTreeMap<LocationKey, Option<Coordinate>>,
        landmarks: &BTreeMap<LocationKey, Vec<PointOfInterest>>,
        mut progress: F,
    ) -> Result<Vec<EnrichedRow<R>>, IndexError>
    where
        R: ListingRow,
        F: FnMut(usize, usize),
    {
        let (center_index, center_keys) = self.city_center_index(centers)?;
        let landmark_indexes = self.landmark_indexes(landmarks)?;
        log::info!(
            "Computing nearest distances for {} rows ({} city centers, {} landmark sets)",
            rows.len(),
            center_keys.len(),
            landmark_indexes.len(),
        );

        let total = rows.len();
        let mut enriched = Vec::with_capacity(total);
        for (i, row) in rows.into_iter().enumerate() {
            let key = row.location_key();
            // A missing position goes through as NaN and comes back (NaN, None).
            let point = row.coordinate().unwrap_or(Coordinate {
                lat: f64::NAN,
                lon: f64::NAN,
            });

            let nearest_city_center_miles = if center_keys.contains(&key) {
                query(center_index.as_ref(), &point).0
            } else {
                f64::NAN
            };

            let (nearest_landmark_miles, nearest_landmark_name) = match landmark_indexes.get(&key) {
                Some(CityLandmarks { index: Some(index), names }) if !index.is_empty() => {
                    let (miles, idx) = index.nearest(&point);
                    (miles, idx.and_then(|i| names.get(i).cloned().flatten()))
                }
                _ => (f64::NAN, None),
            };

            enriched.push(EnrichedRow {
                row,
                nearest_city_center_miles,
                nearest_landmark_miles,
                nearest_landmark_name,
            });
            progress(i + 1, total);
        }
        Ok(enriched)
    }
}
