// src/services/review_service.rs
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing;

use crate::{
    errors::SparrowError as AppError,
    models::{
        identity::{Principal, Role},
        review::{average_rating, Review, ReviewRequest},
        trip::TripStatus,
    },
    services::{
        driver_service::{DriverOperations, DriverService},
        store_service::{RideStore, MAX_WRITE_ATTEMPTS},
    },
    utils::id_generator::{IdType, WithGeneratedId},
};

#[async_trait]
pub trait ReviewOperations: Send + Sync {
    async fn submit_review(&self, principal: &Principal, trip_id: &str, request: ReviewRequest) -> Result<Review, AppError>;
    async fn driver_reviews(&self, driver_id: &str) -> Result<Vec<Review>, AppError>;
}

pub struct ReviewService {
    store: Arc<dyn RideStore>,
    driver_service: Arc<DriverService>,
}

impl ReviewService {
    pub fn new(store: Arc<dyn RideStore>, driver_service: Arc<DriverService>) -> Self {
        Self { store, driver_service }
    }

    /// Recomputes the driver's rating from every review they have.
    async fn refresh_driver_rating(&self, driver_id: &str) -> Result<(), AppError> {
        let ratings: Vec<f64> = self
            .store
            .reviews_for_driver(driver_id)
            .await?
            .iter()
            .map(|r| r.rating)
            .collect();
        let rating = average_rating(&ratings);
        let count = u32::try_from(ratings.len()).unwrap_or(u32::MAX);
        self.driver_service.set_rating(driver_id, rating, count).await?;
        tracing::info!("Driver {} rating is now {} over {} reviews", driver_id, rating, count);
        Ok(())
    }

    async fn link_review(&self, trip_id: &str, review_id: &str) -> Result<(), AppError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut trip = self
                .store
                .get_trip(trip_id)
                .await?
                .ok_or_else(|| AppError::TripNotFound(trip_id.to_string()))?;
            if trip.review_id.is_some() {
                return Ok(());
            }
            let expected = trip.version;
            trip.review_id = Some(review_id.to_string());
            trip.version += 1;
            trip.updated_at = Utc::now();
            if self.store.replace_trip(&trip, expected).await? {
                return Ok(());
            }
        }
        Err(AppError::conflict(format!("Trip {} is being updated concurrently", trip_id)))
    }
}

#[async_trait]
impl ReviewOperations for ReviewService {
    async fn submit_review(&self, principal: &Principal, trip_id: &str, request: ReviewRequest) -> Result<Review, AppError> {
        principal.require_role(&[Role::Rider])?;
        request.validate()?;

        let trip = self
            .store
            .get_trip(trip_id)
            .await?
            .ok_or_else(|| AppError::TripNotFound(trip_id.to_string()))?;
        if !trip.is_owned_by_rider(&principal.id) {
            return Err(AppError::forbidden("Only the rider of this trip can review it"));
        }
        if trip.status != TripStatus::Completed {
            return Err(AppError::conflict(format!(
                "Trip {} is {}; only completed trips can be reviewed",
                trip.id, trip.status
            )));
        }
        let driver_id = trip
            .driver_id
            .clone()
            .ok_or_else(|| AppError::conflict(format!("Trip {} has no driver to review", trip.id)))?;

        let review = Review {
            id: String::new(),
            trip_id: trip.id.clone(),
            rider_id: principal.id.clone(),
            driver_id: driver_id.clone(),
            rating: request.rating,
            comment: request.comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
            created_at: Utc::now(),
        }
        .with_generated_id(IdType::Review);

        if !self.store.insert_review(&review).await? {
            return Err(AppError::conflict(format!("Trip {} has already been reviewed", trip.id)));
        }
        tracing::info!("Review {} submitted for trip {} ({} stars)", review.id, trip.id, review.rating);

        self.link_review(&trip.id, &review.id).await?;
        if let Err(e) = self.refresh_driver_rating(&driver_id).await {
            tracing::warn!("Failed to refresh rating for driver {}: {}", driver_id, e);
        }
        Ok(review)
    }

    async fn driver_reviews(&self, driver_id: &str) -> Result<Vec<Review>, AppError> {
        let mut reviews = self.store.reviews_for_driver(driver_id).await?;
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reviews)
    }
}
