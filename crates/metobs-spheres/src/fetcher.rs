//! Sphere feed retrieval and normalization.
//! The feed is a GeoJSON FeatureCollection of `Point` features.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use metobs_core::{ReqwestErrorExt, SpheresConfig};
use reqwest::{Client, Response};
use url::Url;

use crate::retry::{self, RetryConfig};
use crate::types::{
    is_image_url, Feature, FeatureCollection, FetchError, GeoPoint, SphereCollection,
    SphereRecord, MAX_ALTITUDE_M,
};

const USER_AGENT: &str = "MetObs/3.0 (sphere navigation)";

/// Largest feed body accepted, in bytes
pub const DEFAULT_MAX_FEED_BYTES: usize = 16 * 1024 * 1024;

/// Source of sphere collections.
///
/// Implementations only read; publishing results is the cache's job.
#[async_trait]
pub trait SphereSource: Send + Sync {
    async fn fetch(&self) -> Result<SphereCollection, FetchError>;
}

/// Downloads the sphere feed over HTTP
#[derive(Debug, Clone)]
pub struct HttpSphereSource {
    client: Arc<Client>,
    feed_url: Url,
    asset_base: Url,
    project: Option<String>,
    retry: RetryConfig,
    max_body_bytes: usize,
}

impl HttpSphereSource {
    pub fn new(feed_url: &str, asset_base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        let feed_url = Url::parse(feed_url)
            .with_context(|| format!("Invalid sphere feed URL: {}", feed_url))?;
        let asset_base = Url::parse(asset_base_url)
            .with_context(|| format!("Invalid asset base URL: {}", asset_base_url))?;

        Ok(Self {
            client: Arc::new(client),
            feed_url,
            asset_base: with_trailing_slash(asset_base),
            project: None,
            retry: RetryConfig::default(),
            max_body_bytes: DEFAULT_MAX_FEED_BYTES,
        })
    }

    pub fn from_config(config: &SpheresConfig) -> Result<Self> {
        let project = Some(config.project.clone()).filter(|p| !p.trim().is_empty());
        Ok(
            Self::new(&config.feed_url, &config.asset_base_url, config.fetch_timeout())?
                .with_retry(RetryConfig::from_config(config))
                .with_project(project)
                .with_max_body_bytes(config.max_feed_bytes),
        )
    }

    /// Project label for features that do not carry one
    pub fn with_project(mut self, project: Option<String>) -> Self {
        self.project = project;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn feed_url(&self) -> &Url {
        &self.feed_url
    }
}

#[async_trait]
impl SphereSource for HttpSphereSource {
    async fn fetch(&self) -> Result<SphereCollection, FetchError> {
        tracing::debug!("Fetching sphere feed from {}", self.feed_url);

        let response = retry::with_retry(&self.retry, || {
            self.client.get(self.feed_url.clone()).send()
        })
        .await
        .map_err(|e| FetchError::Network(e.into_network_error()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Sphere feed returned status {}", status);
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = read_body(response, self.max_body_bytes).await?;

        let collection = parse_feed(&body, &self.asset_base, self.project.as_deref())?;
        tracing::info!(
            "Fetched {} spheres from {}",
            collection.len(),
            self.feed_url
        );
        Ok(collection)
    }
}

/// Read the body as UTF-8, giving up once it passes `limit` bytes.
async fn read_body(mut response: Response, limit: usize) -> Result<String, FetchError> {
    if response.content_length().map_or(false, |len| len > limit as u64) {
        tracing::warn!("Sphere feed announces more than {} bytes", limit);
        return Err(FetchError::TooLarge { limit });
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| FetchError::Network(e.into_network_error()))?
    {
        if body.len() + chunk.len() > limit {
            tracing::warn!("Sphere feed body passed {} bytes", limit);
            return Err(FetchError::TooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }

    String::from_utf8(body).map_err(|e| FetchError::Malformed(format!("feed is not UTF-8: {}", e)))
}

/// Parse a feed body into a sphere collection.
///
/// Any structurally invalid feature rejects the whole feed.
pub fn parse_feed(
    body: &str,
    asset_base: &Url,
    default_project: Option<&str>,
) -> Result<SphereCollection, FetchError> {
    let feed: FeatureCollection = serde_json::from_str(body)
        .map_err(|e| FetchError::Malformed(format!("invalid GeoJSON: {}", e)))?;

    if feed.kind != "FeatureCollection" {
        return Err(FetchError::Malformed(format!(
            "expected a FeatureCollection, got {}",
            feed.kind
        )));
    }

    if feed.features.is_empty() {
        return Err(FetchError::Empty);
    }

    let asset_base = with_trailing_slash(asset_base.clone());
    let records = feed
        .features
        .into_iter()
        .enumerate()
        .map(|(i, feature)| {
            feature_to_record(feature, &asset_base, default_project)
                .map_err(|reason| FetchError::Malformed(format!("feature {}: {}", i, reason)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    SphereCollection::new(records)
}

fn feature_to_record(
    feature: Feature,
    asset_base: &Url,
    default_project: Option<&str>,
) -> std::result::Result<SphereRecord, String> {
    let props = feature.properties;
    let id = props.id.trim().to_string();
    if id.is_empty() {
        return Err("empty sphere id".to_string());
    }

    if feature.kind != "Feature" {
        return Err(format!("{}: expected a Feature, got {}", id, feature.kind));
    }

    if feature.geometry.kind != "Point" {
        return Err(format!("{}: geometry must be a Point, got {}", id, feature.geometry.kind));
    }

    let coords = &feature.geometry.coordinates;
    let (longitude, latitude, altitude) = match coords.as_slice() {
        [lon, lat] => (*lon, *lat, None),
        [lon, lat, alt] => (*lon, *lat, Some(*alt)),
        _ => {
            return Err(format!(
                "{}: expected [lon, lat] or [lon, lat, alt], got {} values",
                id,
                coords.len()
            ))
        }
    };

    let location = GeoPoint::try_new(latitude, longitude).map_err(|e| format!("{}: {}", id, e))?;

    if let Some(alt) = altitude {
        if !alt.is_finite() || alt >= MAX_ALTITUDE_M {
            return Err(format!("{}: altitude {} out of range", id, alt));
        }
    }

    let panorama = match props.panorama.as_deref() {
        Some(reference) => resolve_image(asset_base, reference).map_err(|e| format!("{}: {}", id, e))?,
        None => return Err(format!("{}: missing panorama asset", id)),
    };

    let thumbnail = props
        .thumbnail
        .as_deref()
        .map(|reference| resolve_image(asset_base, reference))
        .transpose()
        .map_err(|e| format!("{}: {}", id, e))?;

    let date = props.date.as_deref().and_then(|raw| {
        let parsed = parse_date(raw);
        if parsed.is_none() {
            tracing::debug!("Ignoring unparseable date '{}' on sphere {}", raw, id);
        }
        parsed
    });

    let project = props
        .project
        .or_else(|| default_project.map(str::to_string));

    Ok(SphereRecord {
        id,
        location,
        altitude,
        panorama,
        thumbnail,
        author: props.author,
        date,
        project,
        label: props.label,
    })
}

fn resolve_image(asset_base: &Url, reference: &str) -> std::result::Result<Url, String> {
    let url = resolve_asset(asset_base, reference)?;
    if !is_image_url(&url) {
        return Err(format!("asset {} is not an image", url));
    }
    Ok(url)
}

/// Resolve an asset reference against the base URL.
///
/// Absolute http(s) URLs are kept as-is. Relative references must stay under
/// the base URL's origin and path.
pub fn resolve_asset(asset_base: &Url, reference: &str) -> std::result::Result<Url, String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err("empty asset reference".to_string());
    }

    match Url::parse(reference) {
        Ok(url) => {
            if url.scheme() == "http" || url.scheme() == "https" {
                Ok(url)
            } else {
                Err(format!("unsupported asset scheme: {}", url.scheme()))
            }
        }
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let joined = asset_base
                .join(reference)
                .map_err(|e| format!("invalid asset reference '{}': {}", reference, e))?;

            if joined.origin() != asset_base.origin()
                || !joined.path().starts_with(asset_base.path())
            {
                tracing::error!("Asset reference escapes base URL: {}", reference);
                return Err(format!("asset reference '{}' escapes the base URL", reference));
            }
            Ok(joined)
        }
        Err(e) => Err(format!("invalid asset reference '{}': {}", reference, e)),
    }
}

/// Feed dates come as RFC 3339, naive timestamps or bare dates.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
