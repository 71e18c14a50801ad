// src/models/fare.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::SparrowError;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VehicleClass {
    Sedan,
    #[serde(rename = "SUV")]
    Suv,
    Van,
}

impl VehicleClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::Sedan => "Sedan",
            VehicleClass::Suv => "SUV",
            VehicleClass::Van => "Van",
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleClass {
    type Err = SparrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Sedan" => Ok(VehicleClass::Sedan),
            "SUV" => Ok(VehicleClass::Suv),
            "Van" => Ok(VehicleClass::Van),
            other => Err(SparrowError::InvalidFieldValue {
                field: "vehicle_type".to_string(),
                value: other.to_string(),
                reason: "expected one of Sedan, SUV, Van".to_string(),
            }),
        }
    }
}

/// Per-class tariff. Amounts are integer minor currency units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FareRate {
    pub base_fare: i64,
    pub per_km_rate: i64,
    pub per_min_rate: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FareBreakdown {
    pub base_fare: i64,
    pub distance_fare: i64,
    pub time_fare: i64,
    pub surge_multiplier: f64,
    pub total_fare: i64,
    pub currency: String,
}

impl Default for FareBreakdown {
    fn default() -> Self {
        Self {
            base_fare: 0,
            distance_fare: 0,
            time_fare: 0,
            surge_multiplier: 1.0,
            total_fare: 0,
            currency: "inr".to_string(),
        }
    }
}

impl FareBreakdown {
    pub fn validate(&self) -> Result<(), SparrowError> {
        if self.base_fare < 0 || self.distance_fare < 0 || self.time_fare < 0 || self.total_fare < 0 {
            return Err(SparrowError::validation_error("fare", "Fare components cannot be negative"));
        }
        if !self.surge_multiplier.is_finite() || self.surge_multiplier < 1.0 {
            return Err(SparrowError::validation_error("fare.surge_multiplier", "Surge multiplier must be at least 1.0"));
        }
        Ok(())
    }
}

/// Which surge factors were active when an estimate was produced.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SurgeFactors {
    pub peak_hour: bool,
    pub weekend: bool,
    pub late_night: bool,
    pub random_spike: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FareEstimate {
    pub distance_km: f64,
    pub estimated_duration_min: i64,
    pub fare: FareBreakdown,
    pub surge_factors: SurgeFactors,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FareEstimateRequest {
    pub pickup_location: crate::models::geo::GeoPoint,
    pub dropoff_location: crate::models::geo::GeoPoint,
    pub vehicle_type: String,
}
