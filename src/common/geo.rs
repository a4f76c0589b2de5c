use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometers, used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Coordinate masking granularity: two decimal places, roughly 1.1 km.
pub const MASK_DECIMALS: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// True when both axes are inside the valid WGS84 range.
    pub fn in_range(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

/// Great-circle distance between two coordinates in kilometers.
pub fn haversine_distance_km(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let delta_phi = (b.latitude - a.latitude).to_radians();
    let delta_lambda = (b.longitude - a.longitude).to_radians();

    let h = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Round both axes to [`MASK_DECIMALS`] places. Rounding is idempotent:
/// masking an already-masked coordinate returns it unchanged.
pub fn mask_coordinate(c: Coordinate) -> Coordinate {
    let scale = 10f64.powi(MASK_DECIMALS);
    Coordinate {
        latitude: (c.latitude * scale).round() / scale,
        longitude: (c.longitude * scale).round() / scale,
    }
}

/// Arithmetic mean of the two coordinates per axis, after masking `a` when
/// requested. Planar approximation, no geodesic correction; the search
/// radius and ranking downstream assume exactly this formula.
pub fn compute_midpoint(a: Coordinate, b: Coordinate, mask_a: bool) -> Coordinate {
    let a = if mask_a { mask_coordinate(a) } else { a };
    Coordinate {
        latitude: (a.latitude + b.latitude) / 2.0,
        longitude: (a.longitude + b.longitude) / 2.0,
    }
}
