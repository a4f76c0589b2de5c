use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::common::geo::Coordinate;

/// Candidate venue returned by the places provider, annotated with the
/// distance from the search center. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    pub name: String,
    pub address: String,
    pub location: Coordinate,
    /// 0.0 means the provider returned no rating.
    pub rating: f64,
    pub distance_km: f64,
    pub provider_place_id: Option<String>,
}

impl Place {
    /// Uniqueness key: the provider id when present, otherwise the
    /// synthesized one.
    pub fn dedup_key(&self) -> &str {
        self.provider_place_id.as_deref().unwrap_or(&self.id)
    }
}

/// Keep the first occurrence of each uniqueness key, preserving rank order.
pub fn dedup_places(places: Vec<Place>) -> Vec<Place> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(places.len());
    for place in places {
        if seen.insert(place.dedup_key().to_string()) {
            out.push(place);
        }
    }
    out
}
