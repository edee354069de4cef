//! Spatial nearest-neighbor layer: haversine index plus its artifact store.

pub mod index;
pub mod store;

pub use index::{haversine_miles, query, IndexError, SpatialIndex, EARTH_RADIUS_MILES};
pub use store::{fingerprint, sanitize_key, IndexStore};
