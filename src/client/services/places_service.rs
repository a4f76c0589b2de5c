use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::client::models::place::Place;
use crate::common::geo::{self, Coordinate};
use crate::config::AppConfig;

/// Provider query parameters derived from a meetup category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryQuery {
    pub place_type: Option<&'static str>,
    pub keyword: Option<&'static str>,
}

/// Fixed category table. Unknown labels fall back to a generic
/// point-of-interest query, never an error.
pub fn category_query(category: &str) -> CategoryQuery {
    let (place_type, keyword) = match category {
        "police" => (Some("police"), None),
        "gas" => (Some("gas_station"), None),
        "restaurant" => (Some("restaurant"), None),
        "cafe" => (Some("cafe"), None),
        "shopping_mall" => (Some("shopping_mall"), None),
        "park" => (Some("park"), None),
        // legacy label from old deep links
        "rest" => (None, Some("rest area")),
        _ => (Some("point_of_interest"), None),
    };
    CategoryQuery { place_type, keyword }
}

#[derive(Debug, Error)]
pub enum PlacesError {
    #[error("no places API key configured")]
    Configuration,
    #[error("provider denied the request: {0}")]
    AccessDenied(String),
    #[error("provider rejected the request parameters: {0}")]
    InvalidRequest(String),
    #[error("transient provider failure: {0}")]
    Transient(String),
}

/// Search seam so the lifecycle can run against scripted providers in tests.
#[async_trait]
pub trait PlaceSearch: Send + Sync {
    /// One query against the provider. Returns the full ranked result set;
    /// truncation is the caller's concern. An empty `Ok` means the provider
    /// reported zero results, which is not an error.
    async fn search(
        &self,
        center: Coordinate,
        category: &str,
        radius_m: u32,
    ) -> Result<Vec<Place>, PlacesError>;
}

/// Nearby-search response shape shared by Google-style places endpoints.
#[derive(Debug, Deserialize)]
struct NearbySearchResponse {
    status: String,
    #[serde(default)]
    results: Vec<RawPlace>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPlace {
    place_id: Option<String>,
    name: Option<String>,
    vicinity: Option<String>,
    formatted_address: Option<String>,
    geometry: RawGeometry,
    rating: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawGeometry {
    location: RawLatLng,
}

#[derive(Debug, Deserialize)]
struct RawLatLng {
    lat: f64,
    lng: f64,
}

/// HTTP client for the external places provider.
pub struct PlacesClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl PlacesClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        Self::new(
            &config.places_base_url,
            &config.places_api_key,
            Duration::from_secs(config.http_timeout_secs),
        )
    }
}

#[async_trait]
impl PlaceSearch for PlacesClient {
    async fn search(
        &self,
        center: Coordinate,
        category: &str,
        radius_m: u32,
    ) -> Result<Vec<Place>, PlacesError> {
        if self.api_key.trim().is_empty() {
            return Err(PlacesError::Configuration);
        }

        let query = category_query(category);
        log::info!(
            "[PLACES] Nearby search center={} category={} radius={}m",
            center,
            category,
            radius_m
        );

        let mut request = self.http.get(&self.base_url).query(&[
            ("location", format!("{},{}", center.latitude, center.longitude)),
            ("radius", radius_m.to_string()),
            ("key", self.api_key.clone()),
        ]);
        if let Some(place_type) = query.place_type {
            request = request.query(&[("type", place_type)]);
        }
        if let Some(keyword) = query.keyword {
            request = request.query(&[("keyword", keyword)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PlacesError::Transient(e.to_string()))?;
        let body: NearbySearchResponse = response
            .json()
            .await
            .map_err(|e| PlacesError::Transient(e.to_string()))?;

        match body.status.as_str() {
            "OK" => {
                let places = rank_places(annotate_results(body.results, center));
                log::info!("[PLACES] {} results for category {}", places.len(), category);
                Ok(places)
            }
            "ZERO_RESULTS" => {
                log::info!("[PLACES] Zero results for category {}", category);
                Ok(Vec::new())
            }
            "REQUEST_DENIED" => Err(PlacesError::AccessDenied(
                body.error_message.unwrap_or_else(|| "request denied".to_string()),
            )),
            "INVALID_REQUEST" => Err(PlacesError::InvalidRequest(
                body.error_message.unwrap_or_else(|| "invalid request".to_string()),
            )),
            other => Err(PlacesError::Transient(format!(
                "unexpected provider status {}",
                other
            ))),
        }
    }
}

/// Map raw provider results into [`Place`]s: annotate the distance from the
/// search center, default missing ratings to 0 and synthesize an id when
/// the provider omits one (unique within the batch).
fn annotate_results(results: Vec<RawPlace>, center: Coordinate) -> Vec<Place> {
    results
        .into_iter()
        .map(|raw| {
            let location = Coordinate::new(raw.geometry.location.lat, raw.geometry.location.lng);
            let id = raw
                .place_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            Place {
                id,
                name: raw.name.unwrap_or_else(|| "Unnamed place".to_string()),
                address: raw.vicinity.or(raw.formatted_address).unwrap_or_default(),
                location,
                rating: raw.rating.unwrap_or(0.0),
                distance_km: geo::haversine_distance_km(center, location),
                provider_place_id: raw.place_id,
            }
        })
        .collect()
}

/// Rating descending, ties broken by distance ascending. This ordering is a
/// contract the rest of the app relies on.
pub fn rank_places(mut places: Vec<Place>) -> Vec<Place> {
    places.sort_by(|a, b| {
        b.rating
            .total_cmp(&a.rating)
            .then_with(|| a.distance_km.total_cmp(&b.distance_km))
    });
    places
}
