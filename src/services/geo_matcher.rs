// src/services/geo_matcher.rs
use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    errors::SparrowError as AppError,
    models::{
        driver::{DriverProfile, NearbyDriver},
        geo::{round2, Coordinates},
    },
    services::store_service::RideStore,
};

pub const DEFAULT_MATCH_RADIUS_M: f64 = 5000.0;

#[async_trait]
pub trait MatchOperations: Send + Sync {
    /// Eligible drivers within `max_distance_m` of `point`, nearest first.
    async fn find_nearby(
        &self,
        point: Coordinates,
        max_distance_m: Option<f64>,
    ) -> Result<Vec<NearbyDriver>, AppError>;
}

pub struct GeoMatcher {
    store: Arc<dyn RideStore>,
}

impl GeoMatcher {
    pub fn new(store: Arc<dyn RideStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MatchOperations for GeoMatcher {
    async fn find_nearby(
        &self,
        point: Coordinates,
        max_distance_m: Option<f64>,
    ) -> Result<Vec<NearbyDriver>, AppError> {
        point.validate("location")?;
        let radius_m = max_distance_m.unwrap_or(DEFAULT_MATCH_RADIUS_M);
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(AppError::validation_error("radius", "Radius must be a positive number of metres"));
        }

        let candidates = self.store.nearby_drivers(&point, radius_m).await?;
        let max_km = radius_m / 1000.0;

        // The index measures with its own earth model; report and filter on ours.
        let mut matches: Vec<NearbyDriver> = candidates
            .iter()
            .filter(|driver| driver.is_eligible())
            .filter_map(|driver| {
                let location = driver.current_location?;
                let distance_km = round2(point.haversine_km(&location));
                (distance_km <= max_km).then(|| NearbyDriver {
                    driver_id: driver.id.clone(),
                    distance_km,
                    profile: DriverProfile::from(driver),
                })
            })
            .collect();
        matches.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));

        tracing::debug!(
            "Found {} drivers within {} m of [{}, {}]",
            matches.len(),
            radius_m,
            point.longitude,
            point.latitude
        );
        Ok(matches)
    }
}
