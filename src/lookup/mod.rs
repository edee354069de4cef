//! Remote lookup subsystem for proxicity.
//!
//! Resolves city centers and landmarks for `"<city>, <region>"` keys through
//! rate-limited, retrying HTTP clients, with a write-through JSON cache per
//! resolver.

pub mod cache;
pub mod city_center;
pub mod client;
pub mod landmarks;
pub mod types;

pub use cache::{CacheError, CacheSummary, PersistentCache};
pub use city_center::CityCenterResolver;
pub use client::{Clock, EndpointSelection, RetryClient, RetryPolicy, SystemClock, Transport, UreqTransport};
pub use landmarks::PointOfInterestResolver;
pub use types::{Coordinate, LocationKey, LookupError, PointOfInterest, Progress};
