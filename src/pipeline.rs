//! Wires configured resolvers, index store and enricher together.
//!
//! Flow: unique pairs → city centers → landmarks → indexes → per-row distances.

use crate::config::Config;
use crate::enrich::{EnrichedRow, Enricher, ListingRow};
use crate::lookup::{
    CacheError, CityCenterResolver, EndpointSelection, PointOfInterestResolver, Progress,
    RetryClient, SystemClock, UreqTransport,
};
use crate::spatial::{IndexError, IndexStore};
use serde::Serialize;

pub struct Pipeline {
    pub centers: CityCenterResolver,
    pub landmarks: PointOfInterestResolver,
    pub store: IndexStore,
}

/// Non-empty derived fields across an enriched table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Completeness {
    pub rows: usize,
    pub with_city_center: usize,
    pub with_landmark: usize,
    pub with_landmark_name: usize,
}

impl Completeness {
    pub fn of<R>(rows: &[EnrichedRow<R>]) -> Self {
        Self {
            rows: rows.len(),
            with_city_center: rows.iter().filter(|r| !r.nearest_city_center_miles.is_nan()).count(),
            with_landmark: rows.iter().filter(|r| !r.nearest_landmark_miles.is_nan()).count(),
            with_landmark_name: rows.iter().filter(|r| r.nearest_landmark_name.is_some()).count(),
        }
    }
}

impl Pipeline {
    /// Real HTTP clients and caches as configured.
    pub fn from_config(cfg: &Config) -> Result<Self, CacheError> {
        let user_agent = cfg.client.user_agent();

        let center_client = RetryClient::new(
            Box::new(UreqTransport::new(cfg.nominatim.timeout)),
            Box::new(SystemClock),
            cfg.nominatim.retry.clone(),
            vec![cfg.nominatim.url.clone()],
            EndpointSelection::First,
            user_agent.clone(),
        );
        let landmark_client = RetryClient::new(
            Box::new(UreqTransport::new(cfg.overpass.timeout)),
            Box::new(SystemClock),
            cfg.overpass.retry.clone(),
            cfg.overpass.endpoints.clone(),
            EndpointSelection::Random,
            user_agent,
        );

        Ok(Self {
            centers: CityCenterResolver::open(
                center_client,
                &cfg.nominatim.cache_file,
                cfg.nominatim.country.clone(),
            )?,
            landmarks: PointOfInterestResolver::open(
                landmark_client,
                &cfg.overpass.cache_file,
                cfg.overpass.country_code.clone(),
            )?,
            store: IndexStore::new(&cfg.index.cache_dir, cfg.index.rebuild_stale),
        })
    }

    pub fn set_offline(&mut self, offline: bool) {
        self.centers.set_offline(offline);
        self.landmarks.set_offline(offline);
    }

    /// Resolve everything `rows` needs, then enrich them.
    pub fn run<R, P, Q>(
        &mut self,
        pairs: Vec<(String, String)>,
        rows: Vec<R>,
        mut lookup_progress: P,
        row_progress: Q,
    ) -> Result<Vec<EnrichedRow<R>>, IndexError>
    where
        R: ListingRow,
        P: FnMut(&str, Progress<'_>),
        Q: FnMut(usize, usize),
    {
        let centers = self
            .centers
            .resolve_all(pairs.iter().cloned(), |p| lookup_progress("city centers", p));
        let landmarks = self
            .landmarks
            .resolve_all_for_cities(pairs, |p| lookup_progress("landmarks", p));
        Enricher::new(&self.store).enrich(rows, &centers, &landmarks, row_progress)
    }
}
