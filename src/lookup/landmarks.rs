//! Landmark resolver backed by Overpass-compatible spatial-query mirrors.
//!
//! Each attempt POSTs the query to a randomly chosen mirror. Exhausted
//! retries store an empty list for the key, which is never retried.

use super::cache::{CacheError, CacheSummary, PersistentCache};
use super::city_center::dedup_pairs;
use super::client::RetryClient;
use super::types::{Coordinate, LocationKey, LookupError, PointOfInterest, Progress};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// OSM keys whose nodes count as landmarks.
pub const LANDMARK_TAGS: [&str; 4] = ["tourism", "amenity", "historic", "leisure"];

#[derive(Deserialize, Debug)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Deserialize, Debug)]
struct OverpassElement {
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(default)]
    tags: Option<OverpassTags>,
}

#[derive(Deserialize, Debug)]
struct OverpassTags {
    name: Option<String>,
}

/// Overpass QL for tagged nodes inside `city`'s administrative boundary,
/// scoped to the `<country_code>-<region>` ISO 3166-2 area.
pub fn build_query(city: &str, region: &str, country_code: &str) -> String {
    let selectors: String = LANDMARK_TAGS
        .iter()
        .map(|tag| format!("  node[\"{}\"](area.cityArea);\n", tag))
        .collect();
    format!(
        "[out:json][timeout:25];\n\
         area[\"ISO3166-2\"=\"{cc}-{region}\"]->.regionArea;\n\
         area[\"name\"=\"{city}\"][\"boundary\"=\"administrative\"](area.regionArea)->.cityArea;\n\
         (\n{selectors});\n\
         out center;\n",
        cc = country_code,
        region = escape(region),
        city = escape(city),
        selectors = selectors,
    )
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Keep elements that carry both coordinates; drop the rest silently.
fn parse_elements(body: serde_json::Value) -> Result<Vec<PointOfInterest>, LookupError> {
    let response: OverpassResponse =
        serde_json::from_value(body).map_err(|e| LookupError::InvalidResponse(e.to_string()))?;
    Ok(response
        .elements
        .into_iter()
        .filter_map(|el| {
            let coordinate = Coordinate::new(el.lat?, el.lon?)?;
            Some(PointOfInterest {
                name: el.tags.and_then(|t| t.name),
                coordinate,
            })
        })
        .collect())
}

pub struct PointOfInterestResolver {
    client: RetryClient,
    cache: PersistentCache<Vec<PointOfInterest>>,
    country_code: String,
    offline: bool,
}

impl PointOfInterestResolver {
    pub fn new(
        client: RetryClient,
        cache: PersistentCache<Vec<PointOfInterest>>,
        country_code: impl Into<String>,
    ) -> Self {
        log::info!("PointOfInterestResolver initialized ({} cached)", cache.len());
        Self {
            client,
            cache,
            country_code: country_code.into(),
            offline: false,
        }
    }

    pub fn open(
        client: RetryClient,
        cache_file: impl Into<PathBuf>,
        country_code: impl Into<String>,
    ) -> Result<Self, CacheError> {
        Ok(Self::new(client, PersistentCache::load_from(cache_file)?, country_code))
    }

    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    /// Landmarks for one (city, region) pair; empty on permanent failure.
    pub fn resolve(&mut self, city: &str, region: &str) -> Vec<PointOfInterest> {
        let key = LocationKey::new(city, region);
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }
        if self.offline {
            log::debug!("Offline, skipping landmark lookup for {}", key);
            return Vec::new();
        }

        let query = build_query(city, region, &self.country_code);
        let form = [("data", query.as_str())];
        let landmarks = match self.client.execute(key.as_str(), |transport, url, user_agent| {
            parse_elements(transport.post_form_json(url, &form, user_agent)?)
        }) {
            Some(landmarks) => {
                log::info!("Caching {} landmarks for {}", landmarks.len(), key);
                landmarks
            }
            None => {
                log::warn!("Failed to fetch landmarks for {}, caching empty list", key);
                Vec::new()
            }
        };

        self.cache.put(key, landmarks.clone());
        if let Err(e) = self.cache.flush() {
            log::warn!("{}", e);
        }
        landmarks
    }

    /// Resolve every distinct pair once, in first-seen order.
    pub fn resolve_all_for_cities<I, F>(
        &mut self,
        pairs: I,
        mut progress: F,
    ) -> BTreeMap<LocationKey, Vec<PointOfInterest>>
    where
        I: IntoIterator<Item = (String, String)>,
        F: FnMut(Progress<'_>),
    {
        let unique = dedup_pairs(pairs);
        let total = unique.len();
        let mut results = BTreeMap::new();
        for (done, (city, region)) in unique.into_iter().enumerate() {
            let landmarks = self.resolve(&city, &region);
            let key = LocationKey::new(&city, &region);
            progress(Progress { done: done + 1, total, key: &key });
            results.insert(key, landmarks);
        }
        log::info!("Fetched landmarks for {} cities", results.len());
        results
    }

    pub fn cache(&self) -> &PersistentCache<Vec<PointOfInterest>> {
        &self.cache
    }

    pub fn summary(&self) -> CacheSummary {
        CacheSummary {
            total: self.cache.len(),
            resolved: self.cache.iter().filter(|(_, v)| !v.is_empty()).count(),
        }
    }
}
