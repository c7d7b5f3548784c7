use chrono::{DateTime, Utc};
use metobs_core::{AppError, NetworkError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;
use uuid::Uuid;

/// File extensions accepted for panorama and thumbnail assets
pub const IMAGE_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".gif", ".webp"];

/// Highest altitude (meters) accepted for a sphere location
pub const MAX_ALTITUDE_M: f64 = 10_000.0;

/// WGS84 coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Build a point, rejecting non-finite or out-of-range coordinates.
    pub fn try_new(latitude: f64, longitude: f64) -> Result<Self, String> {
        let point = Self::new(latitude, longitude);
        point.validate()?;
        Ok(point)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err(format!(
                "coordinates must be finite numbers, got ({}, {})",
                self.latitude, self.longitude
            ));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(format!("latitude {} outside [-90, 90]", self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(format!("longitude {} outside [-180, 180]", self.longitude));
        }
        Ok(())
    }
}

/// A geolocated panoramic image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SphereRecord {
    pub id: String,
    pub location: GeoPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Panorama image, already resolved against the asset base URL
    pub panorama: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<Url>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl SphereRecord {
    /// GeoJSON feature for map display. Coordinates are `[lon, lat(, alt)]`.
    pub fn to_feature(&self) -> Feature {
        let mut coordinates = vec![self.location.longitude, self.location.latitude];
        if let Some(alt) = self.altitude {
            coordinates.push(alt);
        }

        Feature {
            kind: "Feature".to_string(),
            properties: FeatureProperties {
                id: self.id.clone(),
                panorama: Some(self.panorama.to_string()),
                thumbnail: self.thumbnail.as_ref().map(Url::to_string),
                author: self.author.clone(),
                date: self.date.map(|d| d.to_rfc3339()),
                project: self.project.clone(),
                label: self.label.clone(),
            },
            geometry: Geometry {
                kind: "Point".to_string(),
                coordinates,
            },
        }
    }
}

/// All spheres from one feed fetch, in feed order, with unique ids
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SphereCollection {
    records: Vec<SphereRecord>,
    index: HashMap<String, usize>,
}

impl SphereCollection {
    /// Index the records. Fails on duplicate identifiers.
    pub fn new(records: Vec<SphereRecord>) -> Result<Self, FetchError> {
        let mut index = HashMap::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            if index.insert(record.id.clone(), i).is_some() {
                return Err(FetchError::Malformed(format!(
                    "duplicate sphere id '{}'",
                    record.id
                )));
            }
        }
        Ok(Self { records, index })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SphereRecord> {
        self.position(id).map(|i| &self.records[i])
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn records(&self) -> &[SphereRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SphereRecord> {
        self.records.iter()
    }

    pub fn to_geojson(&self) -> FeatureCollection {
        FeatureCollection {
            kind: "FeatureCollection".to_string(),
            features: self.records.iter().map(SphereRecord::to_feature).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a SphereCollection {
    type Item = &'a SphereRecord;
    type IntoIter = std::slice::Iter<'a, SphereRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// GeoJSON FeatureCollection as published by the sphere feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default = "feature_collection_kind")]
    pub kind: String,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default = "feature_kind")]
    pub kind: String,
    pub properties: FeatureProperties,
    pub geometry: Geometry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureProperties {
    pub id: String,
    #[serde(default)]
    pub panorama: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// Kept as text; the feed mixes RFC 3339 timestamps and bare dates
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type", default = "point_kind")]
    pub kind: String,
    pub coordinates: Vec<f64>,
}

fn feature_collection_kind() -> String {
    "FeatureCollection".to_string()
}

fn feature_kind() -> String {
    "Feature".to_string()
}

fn point_kind() -> String {
    "Point".to_string()
}

/// True when the URL path ends with a known image extension
pub fn is_image_url(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Sphere feed retrieval errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("Feed request failed: {0}")]
    Network(#[from] NetworkError),
    #[error("Feed returned HTTP {status}")]
    Status { status: u16 },
    #[error("Feed body exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("Malformed feed: {0}")]
    Malformed(String),
    #[error("Feed contains no spheres")]
    Empty,
    #[error("Matrix build failed: {0}")]
    Build(String),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Network(NetworkError::Timeout))
    }
}

/// Navigation query errors
#[derive(Debug, thiserror::Error)]
pub enum SphereError {
    #[error("No sphere data available: {0}")]
    NoDataAvailable(#[source] FetchError),
    #[error("Invalid query: {reason} (reference {reference})")]
    InvalidQuery { reason: String, reference: Uuid },
    #[error("Sphere {0} not found")]
    NotFound(String),
}

impl SphereError {
    /// Reject a query, logging it under a fresh incident reference.
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let reference = Uuid::new_v4();
        tracing::error!("Invalid request format: {} - Error UUID: {}", reason, reference);
        SphereError::InvalidQuery { reason, reference }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            SphereError::NoDataAvailable(_) => {
                "Sphere data is not available yet. Please try again later."
            }
            SphereError::InvalidQuery { .. } => {
                "Invalid request format. Contact support with the error reference."
            }
            SphereError::NotFound(_) => "Sphere not found.",
        }
    }
}

impl From<SphereError> for AppError {
    fn from(e: SphereError) -> Self {
        match e {
            SphereError::NoDataAvailable(FetchError::Network(network)) => AppError::Network(network),
            other => AppError::service(other.to_string(), other.user_message()),
        }
    }
}
