//! Panoramic sphere navigation for MetObs
//!
//! Fetches the sphere GeoJSON feed, precomputes the sphere-to-sphere
//! distance/bearing matrix and serves nearest-neighbour queries from a
//! time-bounded cache.

pub mod cache;
pub mod fetcher;
pub mod geodesy;
pub mod matrix;
pub mod navigation;
pub mod retry;
pub mod types;

pub use cache::{
    CacheLoader, CachePolicy, CacheState, CacheStats, Clock, ManualClock, SystemClock, TtlCache,
};
pub use fetcher::{parse_feed, resolve_asset, HttpSphereSource, SphereSource, DEFAULT_MAX_FEED_BYTES};
pub use geodesy::{bearing, distance, EARTH_RADIUS_M};
pub use matrix::{DistanceBearingEntry, DistanceMatrix, PairDistance};
pub use navigation::{
    NavigationService, NearestFilter, NearestQuery, NearestSphere, SnapshotLoader, SphereLink,
    SpherePanorama, SphereSnapshot,
};
pub use retry::RetryConfig;
pub use types::*;
