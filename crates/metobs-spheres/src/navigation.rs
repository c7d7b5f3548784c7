//! Navigation queries over the cached sphere snapshot.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metobs_core::SpheresConfig;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheLoader, CachePolicy, CacheStats, Clock, SystemClock, TtlCache};
use crate::fetcher::{HttpSphereSource, SphereSource};
use crate::geodesy;
use crate::matrix::DistanceMatrix;
use crate::types::{FeatureCollection, FetchError, GeoPoint, SphereCollection, SphereError, SphereRecord};

const DEFAULT_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_MAX_RANGE_M: f64 = 10_000.0;
const DEFAULT_SECTORS: u32 = 30;
const DEFAULT_NEAREST_COUNT: usize = 5;

/// Spheres and their matrix, always from the same fetch
#[derive(Debug)]
pub struct SphereSnapshot {
    pub spheres: SphereCollection,
    pub matrix: DistanceMatrix,
    pub fetched_at: DateTime<Utc>,
}

/// Fetches the feed and builds the matrix as one cache load
pub struct SnapshotLoader {
    source: Arc<dyn SphereSource>,
}

impl SnapshotLoader {
    pub fn new(source: Arc<dyn SphereSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl CacheLoader for SnapshotLoader {
    type Value = SphereSnapshot;
    type Error = FetchError;

    async fn load(&self) -> Result<SphereSnapshot, FetchError> {
        let spheres = self.source.fetch().await?;
        let fetched_at = Utc::now();

        // O(n²): keep it off the async workers
        tokio::task::spawn_blocking(move || {
            let matrix = DistanceMatrix::build(&spheres);
            SphereSnapshot {
                spheres,
                matrix,
                fetched_at,
            }
        })
        .await
        .map_err(|e| FetchError::Build(e.to_string()))
    }
}

/// Optional restrictions on nearest-sphere results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NearestFilter {
    /// Drop spheres farther than this many meters
    #[serde(default)]
    pub max_distance_m: Option<f64>,
    /// Only spheres from this project
    #[serde(default)]
    pub project: Option<String>,
    /// Sphere ids to leave out
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl NearestFilter {
    fn validate(&self) -> Result<(), String> {
        match self.max_distance_m {
            Some(max) if !max.is_finite() || max < 0.0 => Err(format!(
                "max_distance_m must be a finite, non-negative number, got {}",
                max
            )),
            _ => Ok(()),
        }
    }

    fn accepts(&self, sphere: &SphereRecord) -> bool {
        if let Some(project) = &self.project {
            if sphere.project.as_deref() != Some(project.as_str()) {
                return false;
            }
        }
        !self.exclude.iter().any(|id| id == &sphere.id)
    }
}

/// Inbound shape of a nearest query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestQuery {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(flatten)]
    pub filter: NearestFilter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearestSphere {
    pub sphere: SphereRecord,
    pub distance_m: f64,
    pub bearing_deg: f64,
}

/// A neighbour reachable from a panorama
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SphereLink {
    pub id: String,
    pub location: GeoPoint,
    pub distance_m: f64,
    pub bearing_deg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpherePanorama {
    #[serde(flatten)]
    pub sphere: SphereRecord,
    pub links: Vec<SphereLink>,
}

/// Sphere queries backed by the snapshot cache
#[derive(Clone)]
pub struct NavigationService {
    cache: TtlCache<SnapshotLoader>,
    default_max_range_m: f64,
    default_sectors: u32,
    default_nearest_count: usize,
}

impl NavigationService {
    pub fn new(source: Arc<dyn SphereSource>, policy: impl Into<CachePolicy>) -> Self {
        Self::with_clock(source, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        source: Arc<dyn SphereSource>,
        policy: impl Into<CachePolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let loader = Arc::new(SnapshotLoader::new(source));
        Self {
            cache: TtlCache::with_clock("spheres", loader, policy, clock),
            default_max_range_m: DEFAULT_MAX_RANGE_M,
            default_sectors: DEFAULT_SECTORS,
            default_nearest_count: DEFAULT_NEAREST_COUNT,
        }
    }

    /// Service reading the configured HTTP feed
    pub fn from_config(config: &SpheresConfig) -> anyhow::Result<Self> {
        let source = HttpSphereSource::from_config(config)?;
        tracing::info!("Sphere feed: {}", source.feed_url());
        let policy = CachePolicy::new(config.cache_ttl()).with_failure_backoff(config.refresh_backoff());
        let mut service = Self::new(Arc::new(source), policy);
        service.default_max_range_m = config.default_max_range_m;
        service.default_sectors = config.default_sectors;
        service.default_nearest_count = config.default_nearest_count;
        Ok(service)
    }

    /// Service with the default one-hour TTL
    pub fn with_source(source: Arc<dyn SphereSource>) -> Self {
        Self::new(source, DEFAULT_TTL)
    }

    pub fn cache(&self) -> &TtlCache<SnapshotLoader> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Current snapshot, loading it if nothing was ever cached
    pub async fn snapshot(&self) -> Result<Arc<SphereSnapshot>, SphereError> {
        self.cache.get().await.map_err(SphereError::NoDataAvailable)
    }

    /// The `k` spheres closest to `point`, nearest first, ties broken by id.
    pub async fn nearest(
        &self,
        point: GeoPoint,
        k: usize,
        filter: &NearestFilter,
    ) -> Result<Vec<NearestSphere>, SphereError> {
        point.validate().map_err(SphereError::invalid_query)?;
        if k == 0 {
            return Err(SphereError::invalid_query("result count must be at least 1"));
        }
        filter.validate().map_err(SphereError::invalid_query)?;

        let snapshot = self.snapshot().await?;

        let mut candidates: Vec<(f64, &SphereRecord)> = snapshot
            .spheres
            .iter()
            .filter(|sphere| filter.accepts(sphere))
            .map(|sphere| (geodesy::distance(point, sphere.location), sphere))
            .filter(|(d, _)| filter.max_distance_m.map_or(true, |max| *d <= max))
            .collect();

        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        candidates.truncate(k);

        Ok(candidates
            .into_iter()
            .map(|(distance_m, sphere)| NearestSphere {
                sphere: sphere.clone(),
                distance_m,
                bearing_deg: geodesy::bearing(point, sphere.location),
            })
            .collect())
    }

    /// `nearest` for the raw inbound query shape
    pub async fn nearest_query(&self, query: &NearestQuery) -> Result<Vec<NearestSphere>, SphereError> {
        let point = GeoPoint::new(query.latitude, query.longitude);
        let k = query.count.unwrap_or(self.default_nearest_count);
        self.nearest(point, k, &query.filter).await
    }

    /// A sphere and the neighbours a viewer can jump to.
    ///
    /// Neighbours lie within `max_range_m`; at most one is kept per angular
    /// sector of `360 / sectors` degrees (the closest), and any two kept
    /// neighbours are at least half a sector apart.
    pub async fn panorama(
        &self,
        id: &str,
        max_range_m: Option<f64>,
        sectors: Option<u32>,
    ) -> Result<SpherePanorama, SphereError> {
        let max_range_m = max_range_m.unwrap_or(self.default_max_range_m);
        let sectors = sectors.unwrap_or(self.default_sectors);
        if !max_range_m.is_finite() {
            return Err(SphereError::invalid_query(format!(
                "max_range must be finite, got {}",
                max_range_m
            )));
        }
        if sectors == 0 {
            return Err(SphereError::invalid_query("sectors must be at least 1"));
        }

        let snapshot = self.snapshot().await?;
        let sphere = snapshot
            .spheres
            .get(id)
            .ok_or_else(|| SphereError::NotFound(id.to_string()))?;
        let origin = snapshot
            .matrix
            .position(id)
            .ok_or_else(|| SphereError::NotFound(id.to_string()))?;

        Ok(SpherePanorama {
            sphere: sphere.clone(),
            links: select_links(&snapshot, origin, max_range_m, sectors),
        })
    }

    /// Every cached sphere as GeoJSON
    pub async fn geojson(&self) -> Result<FeatureCollection, SphereError> {
        Ok(self.snapshot().await?.spheres.to_geojson())
    }
}

fn select_links(snapshot: &SphereSnapshot, origin: usize, max_range_m: f64, sectors: u32) -> Vec<SphereLink> {
    let width = 360.0 / f64::from(sectors);
    let min_separation = width / 2.0;

    let mut candidates: Vec<_> = snapshot
        .matrix
        .row(origin)
        .filter(|entry| entry.distance_m <= max_range_m)
        .collect();
    candidates.sort_by(|a, b| {
        a.distance_m
            .total_cmp(&b.distance_m)
            .then_with(|| a.destination.cmp(b.destination))
    });

    let mut taken = HashSet::new();
    let mut links: Vec<SphereLink> = Vec::new();
    for entry in candidates {
        let sector = ((entry.bearing_deg / width).floor() as u32).min(sectors - 1);
        if taken.contains(&sector) {
            continue;
        }
        if links
            .iter()
            .any(|link| geodesy::angular_difference(link.bearing_deg, entry.bearing_deg) < min_separation)
        {
            continue;
        }

        let Some(neighbour) = snapshot.spheres.get(entry.destination) else {
            continue;
        };
        taken.insert(sector);
        links.push(SphereLink {
            id: neighbour.id.clone(),
            location: neighbour.location,
            distance_m: entry.distance_m,
            bearing_deg: entry.bearing_deg,
        });
    }
    links
}
