// src/models/driver.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{fare::VehicleClass, geo::Coordinates};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Offline, // Not taking trips
    Online,  // Available for matching
    Busy,    // On an assigned trip
    Break,   // Logged in but paused
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Vehicle {
    pub make: String,
    pub model: String,
    pub license_plate: String,
    pub vehicle_class: VehicleClass,
}

impl Vehicle {
    pub fn description(&self) -> String {
        format!("{} {}", self.make, self.model)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Driver {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub photo: Option<String>,
    pub status: DriverStatus,
    pub current_location: Option<Coordinates>,
    pub vehicle: Vehicle,
    pub is_active: bool,
    pub is_approved: bool,
    pub total_trips: u32,
    pub acceptance_rate: f64,
    pub cancellation_rate: f64,
    pub rating: f64,
    pub rating_count: u32,
    pub device_token: Option<String>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    /// Only online, active, approved drivers with a known location can be matched.
    pub fn is_eligible(&self) -> bool {
        self.status == DriverStatus::Online
            && self.is_active
            && self.is_approved
            && self.current_location.is_some()
    }

    /// Sets the location, or clears it when the pair is unusable. Returns whether it was kept.
    pub fn set_current_location(&mut self, longitude: f64, latitude: f64) -> bool {
        let coordinates = Coordinates::new(longitude, latitude);
        if coordinates.is_valid() {
            self.current_location = Some(coordinates);
            true
        } else {
            self.current_location = None;
            false
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DriverRegistration {
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub photo: Option<String>,
    pub vehicle_make: String,
    pub vehicle_model: String,
    pub license_plate: String,
    pub vehicle_type: VehicleClass,
    pub device_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DriverLocationUpdate {
    pub longitude: f64,
    pub latitude: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DriverStatusUpdate {
    pub status: DriverStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DriverApprovalUpdate {
    pub approved: bool,
}

/// A match candidate as shown to the rider.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NearbyDriver {
    pub driver_id: String,
    pub distance_km: f64,
    pub profile: DriverProfile,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DriverProfile {
    pub name: String,
    pub photo: Option<String>,
    pub phone_number: String,
    pub vehicle: String,
    pub vehicle_plate: String,
    pub vehicle_class: VehicleClass,
    pub status: DriverStatus,
    pub total_trips: u32,
    pub acceptance_rate: f64,
    pub rating: f64,
}

impl From<&Driver> for DriverProfile {
    fn from(driver: &Driver) -> Self {
        Self {
            name: driver.name.clone(),
            photo: driver.photo.clone(),
            phone_number: driver.phone_number.clone(),
            vehicle: driver.vehicle.description(),
            vehicle_plate: driver.vehicle.license_plate.clone(),
            vehicle_class: driver.vehicle.vehicle_class,
            status: driver.status,
            total_trips: driver.total_trips,
            acceptance_rate: driver.acceptance_rate,
            rating: driver.rating,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct DriverEarnings {
    pub driver_id: String,
    pub total_earnings: i64,
    pub total_trips: u32,
    pub total_tips: i64,
    pub average_earnings_per_trip: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_driver;

    #[test]
    fn test_set_current_location_clears_malformed_input() {
        let mut driver = sample_driver(77.59, 12.97);
        assert!(driver.set_current_location(77.6, 12.98));
        assert_eq!(driver.current_location, Some(Coordinates::new(77.6, 12.98)));

        assert!(!driver.set_current_location(f64::NAN, 12.98));
        assert_eq!(driver.current_location, None);

        assert!(driver.set_current_location(77.6, 12.98));
        assert!(!driver.set_current_location(200.0, 12.98));
        assert_eq!(driver.current_location, None);
    }

    #[test]
    fn test_eligibility_requires_every_flag() {
        let driver = sample_driver(77.59, 12.97);
        assert!(driver.is_eligible());

        let mut offline = driver.clone();
        offline.status = DriverStatus::Offline;
        assert!(!offline.is_eligible());

        let mut busy = driver.clone();
        busy.status = DriverStatus::Busy;
        assert!(!busy.is_eligible());

        let mut unapproved = driver.clone();
        unapproved.is_approved = false;
        assert!(!unapproved.is_eligible());

        let mut inactive = driver.clone();
        inactive.is_active = false;
        assert!(!inactive.is_eligible());

        let mut nowhere = driver;
        nowhere.current_location = None;
        assert!(!nowhere.is_eligible());
    }
}
