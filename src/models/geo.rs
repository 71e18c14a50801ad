// src/models/geo.rs
use serde::{Deserialize, Serialize};

use crate::errors::{SparrowError, SparrowResult};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A `[longitude, latitude]` pair, the order used on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Coordinates {
    pub longitude: f64,
    pub latitude: f64,
}

impl From<[f64; 2]> for Coordinates {
    fn from([longitude, latitude]: [f64; 2]) -> Self {
        Self { longitude, latitude }
    }
}

impl From<Coordinates> for [f64; 2] {
    fn from(c: Coordinates) -> Self {
        [c.longitude, c.latitude]
    }
}

impl Coordinates {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self { longitude, latitude }
    }

    pub fn is_valid(&self) -> bool {
        self.longitude.is_finite()
            && self.latitude.is_finite()
            && (-180.0..=180.0).contains(&self.longitude)
            && (-90.0..=90.0).contains(&self.latitude)
    }

    /// Checks the pair and names `field` in the validation error.
    pub fn validate(&self, field: &str) -> SparrowResult<()> {
        if !self.longitude.is_finite() || !self.latitude.is_finite() {
            return Err(SparrowError::validation_error(field, "Coordinates must be valid numbers"));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(SparrowError::validation_error(
                field,
                "Latitude must be between -90 and 90 degrees",
            ));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(SparrowError::validation_error(
                field,
                "Longitude must be between -180 and 180 degrees",
            ));
        }
        Ok(())
    }

    /// Great-circle distance in kilometres (haversine, R = 6371 km).
    pub fn haversine_km(&self, other: &Coordinates) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lng = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_KM * c
    }
}

/// A named point: pickup, stop or dropoff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub coordinates: Coordinates,
    pub address: String,
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64, address: impl Into<String>) -> Self {
        Self {
            coordinates: Coordinates::new(longitude, latitude),
            address: address.into(),
        }
    }

    pub fn validate(&self, field: &str) -> SparrowResult<()> {
        self.coordinates.validate(field)?;
        if self.address.trim().is_empty() {
            return Err(SparrowError::validation_error(field, "Address is required"));
        }
        Ok(())
    }
}

/// Rounds to 2 decimal places, half away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
