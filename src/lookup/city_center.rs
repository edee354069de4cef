//! City-center resolver backed by a Nominatim-compatible geocoder.
//!
//! Flow per key: cache → geocoder (rate limited, retried) → cache write.
//! Exhausted retries store `null` for the key, which is never retried.

use super::cache::{CacheError, CacheSummary, PersistentCache};
use super::client::RetryClient;
use super::types::{Coordinate, LocationKey, LookupError, Progress};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

#[derive(Deserialize, Debug)]
struct NominatimMatch {
    lat: String,
    lon: String,
}

/// Take the first match; zero matches fail the attempt.
fn parse_first_match(body: serde_json::Value, query: &str) -> Result<Coordinate, LookupError> {
    let matches: Vec<NominatimMatch> = serde_json::from_value(body)
        .map_err(|e| LookupError::InvalidResponse(e.to_string()))?;
    let first = matches
        .into_iter()
        .next()
        .ok_or_else(|| LookupError::NoMatch(query.to_string()))?;

    let lat: f64 = first
        .lat
        .trim()
        .parse()
        .map_err(|_| LookupError::InvalidResponse(format!("bad latitude '{}'", first.lat)))?;
    let lon: f64 = first
        .lon
        .trim()
        .parse()
        .map_err(|_| LookupError::InvalidResponse(format!("bad longitude '{}'", first.lon)))?;

    Coordinate::new(lat, lon)
        .ok_or_else(|| LookupError::InvalidResponse(format!("non-finite coordinate for '{}'", query)))
}

pub struct CityCenterResolver {
    client: RetryClient,
    cache: PersistentCache<Option<Coordinate>>,
    country: String,
    offline: bool,
}

impl CityCenterResolver {
    pub fn new(client: RetryClient, cache: PersistentCache<Option<Coordinate>>, country: impl Into<String>) -> Self {
        log::info!("CityCenterResolver initialized ({} cached)", cache.len());
        Self {
            client,
            cache,
            country: country.into(),
            offline: false,
        }
    }

    /// Open the cache at `cache_file` and wrap `client`.
    pub fn open(client: RetryClient, cache_file: impl Into<PathBuf>, country: impl Into<String>) -> Result<Self, CacheError> {
        Ok(Self::new(client, PersistentCache::load_from(cache_file)?, country))
    }

    /// Offline: answer from cache only, leave misses unrecorded.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    /// Resolve one (city, region) pair. `None` is the permanent-failure
    /// sentinel (or an offline miss).
    pub fn resolve(&mut self, city: &str, region: &str) -> Option<Coordinate> {
        let key = LocationKey::new(city, region);
        if let Some(cached) = self.cache.get(&key) {
            return *cached;
        }
        if self.offline {
            log::debug!("Offline, skipping city center lookup for {}", key);
            return None;
        }

        let q = format!("{}, {}, {}", city, region, self.country);
        let params = [
            ("q", q.as_str()),
            ("format", "json"),
            ("limit", "1"),
            ("addressdetails", "0"),
        ];
        let result = self.client.execute(key.as_str(), |transport, url, user_agent| {
            let body = transport.get_json(url, &params, user_agent)?;
            parse_first_match(body, &q)
        });

        match result {
            Some(coord) => log::info!("Caching city center: {} -> {}", key, coord),
            None => log::warn!("Failed to resolve city center for {}, caching null", key),
        }
        self.cache.put(key, result);
        if let Err(e) = self.cache.flush() {
            log::warn!("{}", e);
        }
        result
    }

    /// Resolve every distinct pair once, in first-seen order.
    pub fn resolve_all<I, F>(&mut self, pairs: I, mut progress: F) -> BTreeMap<LocationKey, Option<Coordinate>>
    where
        I: IntoIterator<Item = (String, String)>,
        F: FnMut(Progress<'_>),
    {
        let unique = dedup_pairs(pairs);
        let total = unique.len();
        let mut centers = BTreeMap::new();
        for (done, (city, region)) in unique.into_iter().enumerate() {
            let coord = self.resolve(&city, &region);
            let key = LocationKey::new(&city, &region);
            progress(Progress { done: done + 1, total, key: &key });
            centers.insert(key, coord);
        }
        log::info!("Resolved city centers for {} cities", centers.len());
        centers
    }

    pub fn cache(&self) -> &PersistentCache<Option<Coordinate>> {
        &self.cache
    }

    pub fn summary(&self) -> CacheSummary {
        CacheSummary {
            total: self.cache.len(),
            resolved: self.cache.iter().filter(|(_, v)| v.is_some()).count(),
        }
    }
}

/// Drop repeated pairs, keeping the first occurrence's position.
pub(crate) fn dedup_pairs<I>(pairs: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut seen = HashSet::new();
    pairs
        .into_iter()
        .filter(|pair| seen.insert(pair.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::client::testing::*;
    use super::super::client::{EndpointSelection, RetryClient};
    use super::*;
    use serde_json::json;
    use std::rc::Rc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        transport: Rc<ScriptedTransport>,
        clock: Rc<VirtualClock>,
        dir: TempDir,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                transport: Rc::new(ScriptedTransport::default()),
                clock: Rc::new(VirtualClock::new()),
                dir: TempDir::new().unwrap(),
            }
        }

        fn cache_path(&self) -> PathBuf {
            self.dir.path().join("cache").join("city_centers_cache.json")
        }

        fn resolver(&self, max_retries: u32) -> CityCenterResolver {
            let client = RetryClient::new(
                Box::new(Rc::clone(&self.transport)),
                Box::new(Rc::clone(&self.clock)),
                policy(1.0, max_retries, 2.0),
                vec!["https://geocoder.test/search".into()],
                EndpointSelection::First,
                "proxicity-test (dev@example.com)",
            );
            CityCenterResolver::open(client, self.cache_path(), "USA").unwrap()
        }
    }

    fn hit(lat: &str, lon: &str) -> serde_json::Value {
        json!([{"lat": lat, "lon": lon, "display_name": "somewhere"}])
    }

    #[test]
    fn test_resolve_parses_first_match_and_sends_query() {
        let h = Harness::new();
        h.transport.push_ok(json!([
            {"lat": "39.2903848", "lon": "-76.6121893"},
            {"lat": "0", "lon": "0"}
        ]));
        let mut resolver = h.resolver(3);

        let coord = resolver.resolve("Baltimore", "MD").unwrap();
        assert!((coord.lat - 39.2903848).abs() < 1e-9);
        assert!((coord.lon + 76.6121893).abs() < 1e-9);

        let body = &h.transport.bodies.borrow()[0];
        assert!(body.contains(&("q".into(), "Baltimore, MD, USA".into())));
        assert!(body.contains(&("format".into(), "json".into())));
        assert!(body.contains(&("limit".into(), "1".into())));
        assert!(body.contains(&("addressdetails".into(), "0".into())));
        assert_eq!(h.transport.agents.borrow()[0], "proxicity-test (dev@example.com)");
    }

    #[test]
    fn test_cache_idempotence() {
        let h = Harness::new();
        h.transport.push_ok(hit("47.6", "-122.3"));
        let mut resolver = h.resolver(3);

        let first = resolver.resolve("Seattle", "WA");
        let bytes_after_first = std::fs::read(h.cache_path()).unwrap();
        let second = resolver.resolve("Seattle", "WA");

        assert_eq!(first, second);
        assert_eq!(h.transport.calls.get(), 1);
        assert_eq!(std::fs::read(h.cache_path()).unwrap(), bytes_after_first);
    }

    #[test]
    fn test_no_match_is_retried_then_sentinel() {
        let h = Harness::new();
        for _ in 0..3 {
            h.transport.push_ok(json!([]));
        }
        let mut resolver = h.resolver(3);

        assert!(resolver.resolve("Atlantis", "ZZ").is_none());
        assert_eq!(h.transport.calls.get(), 3);
        assert_eq!(resolver.cache().get(&LocationKey::new("Atlantis", "ZZ")), Some(&None));
    }

    #[test]
    fn test_sentinel_is_terminal_across_instances() {
        let h = Harness::new();
        {
            let mut resolver = h.resolver(2);
            assert!(resolver.resolve("Atlantis", "ZZ").is_none());
            assert_eq!(h.transport.calls.get(), 2);
        }

        h.transport.push_ok(hit("1.0", "2.0"));
        let mut resolver = h.resolver(2);
        for _ in 0..3 {
            assert!(resolver.resolve("Atlantis", "ZZ").is_none());
        }
        assert_eq!(h.transport.calls.get(), 2);
    }

    #[test]
    fn test_round_trip_through_cache_file() {
        let h = Harness::new();
        h.transport.push_ok(hit("30.2672", "-97.7431"));
        let expected = h.resolver(3).resolve("Austin", "TX");

        let fresh = Harness {
            transport: Rc::new(ScriptedTransport::default()),
            clock: Rc::new(VirtualClock::new()),
            dir: h.dir,
        };
        let mut reloaded = fresh.resolver(3);
        assert_eq!(reloaded.resolve("Austin", "TX"), expected);
        assert_eq!(fresh.transport.calls.get(), 0);
    }

    #[test]
    fn test_transient_failure_then_success() {
        let h = Harness::new();
        h.transport.push_err(LookupError::Status(503));
        h.transport.push_ok(json!([{"lat": "not-a-number", "lon": "1"}]));
        h.transport.push_ok(hit("35.0", "-80.0"));
        let mut resolver = h.resolver(3);

        let coord = resolver.resolve("Charlotte", "NC").unwrap();
        assert_eq!(coord, Coordinate { lat: 35.0, lon: -80.0 });
        assert_eq!(
            *h.clock.sleeps.borrow(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[test]
    fn test_resolve_all_dedups_and_reports_progress() {
        let h = Harness::new();
        h.transport.push_ok(hit("1", "1"));
        h.transport.push_ok(hit("2", "2"));
        let mut resolver = h.resolver(1);

        let pairs = vec![
            ("Reno".to_string(), "NV".to_string()),
            ("Boise".to_string(), "ID".to_string()),
            ("Reno".to_string(), "NV".to_string()),
        ];
        let mut seen = Vec::new();
        let centers = resolver.resolve_all(pairs, |p| seen.push((p.done, p.total, p.key.to_string())));

        assert_eq!(h.transport.calls.get(), 2);
        assert_eq!(centers.len(), 2);
        assert_eq!(centers[&LocationKey::new("Reno", "NV")], Coordinate::new(1.0, 1.0));
        assert_eq!(
            seen,
            vec![(1, 2, "Reno, NV".to_string()), (2, 2, "Boise, ID".to_string())]
        );
    }

    #[test]
    fn test_offline_miss_is_not_recorded() {
        let h = Harness::new();
        let mut resolver = h.resolver(3);
        resolver.set_offline(true);

        assert!(resolver.resolve("Tulsa", "OK").is_none());
        assert_eq!(h.transport.calls.get(), 0);
        assert!(!resolver.cache().contains(&LocationKey::new("Tulsa", "OK")));
    }

    #[test]
    fn test_summary_counts_sentinels() {
        let h = Harness::new();
        h.transport.push_ok(hit("1", "1"));
        let mut resolver = h.resolver(1);
        resolver.resolve("Reno", "NV");
        resolver.resolve("Atlantis", "ZZ");

        assert_eq!(resolver.summary(), CacheSummary { total: 2, resolved: 1 });
    }
}
