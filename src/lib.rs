//! Proxicity: proximity features for apartment listings.
//!
//! Resolves city centers and landmarks for each `"<city>, <region>"` through
//! cached, rate-limited remote lookups, then computes great-circle distances
//! from every listing to the nearest city center and the nearest landmark in
//! its city.

pub mod config;
pub mod enrich;
pub mod lookup;
pub mod pipeline;
pub mod spatial;
pub mod table;
