// src/services/driver_service.rs
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing;

use crate::{
    errors::SparrowError as AppError,
    models::driver::{
        Driver, DriverLocationUpdate, DriverRegistration, DriverStatus, Vehicle,
    },
    services::store_service::{RideStore, MAX_WRITE_ATTEMPTS},
    utils::id_generator::{IdGenerator, IdType, WithGeneratedId},
};

#[async_trait]
pub trait DriverOperations: Send + Sync {
    async fn register_driver(&self, registration: DriverRegistration) -> Result<Driver, AppError>;
    async fn get_driver(&self, driver_id: &str) -> Result<Driver, AppError>;
    async fn update_driver_location(&self, driver_id: &str, update: DriverLocationUpdate) -> Result<Driver, AppError>;
    async fn update_driver_status(&self, driver_id: &str, status: DriverStatus) -> Result<Driver, AppError>;
    async fn set_driver_approval(&self, driver_id: &str, approved: bool) -> Result<Driver, AppError>;
    /// Takes an eligible driver off the market for a trip.
    async fn claim_for_trip(&self, driver_id: &str) -> Result<Driver, AppError>;
    /// Puts the driver back online after a trip ends; `completed` also counts the trip.
    async fn release_from_trip(&self, driver_id: &str, completed: bool) -> Result<Driver, AppError>;
    async fn set_rating(&self, driver_id: &str, rating: f64, rating_count: u32) -> Result<Driver, AppError>;
}

pub struct DriverService {
    store: Arc<dyn RideStore>,
}

impl DriverService {
    pub fn new(store: Arc<dyn RideStore>) -> Self {
        Self { store }
    }

    async fn load(&self, driver_id: &str) -> Result<Driver, AppError> {
        if !IdGenerator::validate_id(driver_id, Some(IdType::Driver)) {
            tracing::warn!("Invalid driver ID format: {}", driver_id);
            return Err(AppError::DriverNotFound(driver_id.to_string()));
        }
        self.store
            .get_driver(driver_id)
            .await?
            .ok_or_else(|| AppError::DriverNotFound(driver_id.to_string()))
    }

    /// Read-modify-write with compare-and-set, re-reading on a lost race.
    async fn update_with<F>(&self, driver_id: &str, mut change: F) -> Result<Driver, AppError>
    where
        F: FnMut(&mut Driver) -> Result<(), AppError> + Send,
    {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut driver = self.load(driver_id).await?;
            change(&mut driver)?;
            let expected = driver.version;
            driver.version += 1;
            driver.updated_at = Utc::now();
            if self.store.replace_driver(&driver, expected).await? {
                return Ok(driver);
            }
            tracing::debug!("Driver {} changed underneath us, retrying", driver_id);
        }
        Err(AppError::conflict(format!("Driver {} is being updated concurrently", driver_id)))
    }
}

#[async_trait]
impl DriverOperations for DriverService {
    async fn register_driver(&self, registration: DriverRegistration) -> Result<Driver, AppError> {
        if registration.name.trim().is_empty() {
            return Err(AppError::validation_error("name", "Name is required"));
        }
        if registration.license_plate.trim().is_empty() {
            return Err(AppError::validation_error("license_plate", "License plate is required"));
        }

        let now = Utc::now();
        let driver = Driver {
            id: String::new(),
            name: registration.name,
            email: registration.email,
            phone_number: registration.phone_number,
            photo: registration.photo,
            status: DriverStatus::Offline,
            current_location: None,
            vehicle: Vehicle {
                make: registration.vehicle_make,
                model: registration.vehicle_model,
                license_plate: registration.license_plate.to_uppercase(),
                vehicle_class: registration.vehicle_type,
            },
            is_active: true,
            is_approved: false,
            total_trips: 0,
            acceptance_rate: 100.0,
            cancellation_rate: 0.0,
            rating: 0.0,
            rating_count: 0,
            device_token: registration.device_token,
            last_active_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
        .with_generated_id(IdType::Driver);

        self.store.insert_driver(&driver).await?;
        tracing::info!("Driver registered successfully: {}", driver.id);
        Ok(driver)
    }

    async fn get_driver(&self, driver_id: &str) -> Result<Driver, AppError> {
        self.load(driver_id).await
    }

    async fn update_driver_location(&self, driver_id: &str, update: DriverLocationUpdate) -> Result<Driver, AppError> {
        tracing::debug!("Updating driver location: {}", driver_id);
        let mut kept = true;
        let driver = self
            .update_with(driver_id, |driver| {
                kept = driver.set_current_location(update.longitude, update.latitude);
                driver.last_active_at = Some(Utc::now());
                Ok(())
            })
            .await?;

        if !kept {
            tracing::warn!(
                "Driver {} sent unusable location [{}, {}]; location cleared",
                driver_id, update.longitude, update.latitude
            );
            return Err(AppError::validation_error(
                "location",
                "Coordinates out of range; location cleared until a valid update arrives",
            ));
        }
        Ok(driver)
    }

    async fn update_driver_status(&self, driver_id: &str, status: DriverStatus) -> Result<Driver, AppError> {
        tracing::info!("Updating driver status: {} to {:?}", driver_id, status);
        self.update_with(driver_id, |driver| {
            if status == DriverStatus::Busy {
                return Err(AppError::validation_error("status", "Drivers become busy only through trip assignment"));
            }
            if driver.status == DriverStatus::Busy {
                return Err(AppError::conflict("Driver is on a trip"));
            }
            driver.status = status;
            driver.last_active_at = Some(Utc::now());
            Ok(())
        })
        .await
    }

    async fn set_driver_approval(&self, driver_id: &str, approved: bool) -> Result<Driver, AppError> {
        tracing::info!("Setting driver {} approval to {}", driver_id, approved);
        self.update_with(driver_id, |driver| {
            driver.is_approved = approved;
            Ok(())
        })
        .await
    }

    async fn claim_for_trip(&self, driver_id: &str) -> Result<Driver, AppError> {
        self.update_with(driver_id, |driver| {
            if !driver.is_eligible() {
                return Err(AppError::DriverNotAvailable(driver.id.clone()));
            }
            driver.status = DriverStatus::Busy;
            Ok(())
        })
        .await
    }

    async fn release_from_trip(&self, driver_id: &str, completed: bool) -> Result<Driver, AppError> {
        self.update_with(driver_id, |driver| {
            if driver.status == DriverStatus::Busy {
                driver.status = DriverStatus::Online;
            }
            if completed {
                driver.total_trips += 1;
            }
            Ok(())
        })
        .await
    }

    async fn set_rating(&self, driver_id: &str, rating: f64, rating_count: u32) -> Result<Driver, AppError> {
        self.update_with(driver_id, |driver| {
            driver.rating = rating;
            driver.rating_count = rating_count;
            Ok(())
        })
        .await
    }
}
