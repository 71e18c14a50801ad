// src/services/trip_service.rs
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing;

use crate::{
    errors::SparrowError as AppError,
    models::{
        driver::DriverProfile,
        fare::{FareEstimate, FareEstimateRequest, VehicleClass},
        geo::{round2, Coordinates},
        identity::{Principal, Role},
        rider::RiderSummary,
        trip::{
            CancelTripRequest, CancelledBy, FinalizeTripRequest, RoutePoint, RoutePointRequest,
            Trip, TripDetails, TripDuration, TripPaymentStatus, TripRequest, TripStatus,
        },
    },
    services::{
        driver_service::{DriverOperations, DriverService},
        fare_engine::FareEngine,
        messaging_service::NotificationService,
        store_service::{RideStore, MAX_WRITE_ATTEMPTS},
    },
    utils::id_generator::{IdGenerator, IdType, WithGeneratedId},
};

#[async_trait]
pub trait TripOperations: Send + Sync {
    async fn create_trip(&self, principal: &Principal, request: TripRequest) -> Result<Trip, AppError>;
    async fn estimate_fare(&self, request: FareEstimateRequest) -> Result<FareEstimate, AppError>;
    async fn get_trip(&self, trip_id: &str) -> Result<Trip, AppError>;
    async fn get_trip_details(&self, principal: &Principal, trip_id: &str) -> Result<TripDetails, AppError>;
    async fn assign_driver(&self, principal: &Principal, trip_id: &str, driver_id: &str) -> Result<Trip, AppError>;
    async fn advance_status(&self, principal: &Principal, trip_id: &str, status: TripStatus) -> Result<Trip, AppError>;
    async fn cancel_trip(&self, principal: &Principal, trip_id: &str, request: CancelTripRequest) -> Result<Trip, AppError>;
    async fn append_route_point(&self, principal: &Principal, trip_id: &str, point: RoutePointRequest) -> Result<Trip, AppError>;
    async fn finalize_trip(&self, principal: &Principal, trip_id: &str, request: FinalizeTripRequest) -> Result<Trip, AppError>;
}

pub struct TripService {
    store: Arc<dyn RideStore>,
    fare_engine: Arc<FareEngine>,
    driver_service: Arc<DriverService>,
    notification_service: Arc<dyn NotificationService>,
}

impl TripService {
    pub fn new(
        store: Arc<dyn RideStore>,
        fare_engine: Arc<FareEngine>,
        driver_service: Arc<DriverService>,
        notification_service: Arc<dyn NotificationService>,
    ) -> Self {
        Self {
            store,
            fare_engine,
            driver_service,
            notification_service,
        }
    }

    /// Compare-and-set write of one trip. `change` sees the current document on every
    /// attempt, so a racing writer's result is re-checked; `Ok(false)` means nothing to write.
    async fn write_trip<F>(&self, trip_id: &str, mut change: F) -> Result<(Trip, bool), AppError>
    where
        F: FnMut(&mut Trip) -> Result<bool, AppError> + Send,
    {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut trip = self.get_trip(trip_id).await?;
            if !change(&mut trip)? {
                return Ok((trip, false));
            }
            let expected = trip.version;
            trip.version += 1;
            if self.store.replace_trip(&trip, expected).await? {
                return Ok((trip, true));
            }
            tracing::debug!("Trip {} changed underneath us, retrying", trip_id);
        }
        Err(AppError::conflict(format!("Trip {} is being updated concurrently", trip_id)))
    }

    /// Who may drive a trip forward: its driver, or an admin.
    fn require_trip_driver(principal: &Principal, trip: &Trip) -> Result<(), AppError> {
        if principal.is_admin() || trip.is_assigned_to(&principal.id) {
            Ok(())
        } else {
            Err(AppError::forbidden("Only the assigned driver can update this trip"))
        }
    }

    fn require_participant(principal: &Principal, trip: &Trip) -> Result<(), AppError> {
        if principal.is_admin() || trip.is_owned_by_rider(&principal.id) || trip.is_assigned_to(&principal.id) {
            Ok(())
        } else {
            Err(AppError::forbidden("You are not part of this trip"))
        }
    }

    /// Side effects after a committed transition. Failures here never undo the transition.
    async fn after_transition(&self, trip: &Trip) {
        if trip.status.is_terminal() {
            if let Some(driver_id) = &trip.driver_id {
                let completed = trip.status == TripStatus::Completed;
                if let Err(e) = self.driver_service.release_from_trip(driver_id, completed).await {
                    tracing::warn!("Failed to release driver {} from trip {}: {}", driver_id, trip.id, e);
                }
            }
        }

        if let Err(e) = self.notification_service.notify_trip_status(trip).await {
            tracing::warn!("Failed to send status notification for trip {}: {}", trip.id, e);
        }
    }
}

#[async_trait]
impl TripOperations for TripService {
    async fn create_trip(&self, principal: &Principal, request: TripRequest) -> Result<Trip, AppError> {
        principal.require_role(&[Role::Rider])?;

        let pickup = request
            .pickup_location
            .ok_or_else(|| AppError::MissingRequiredField("pickup_location".to_string()))?;
        let dropoff = request
            .dropoff_location
            .ok_or_else(|| AppError::MissingRequiredField("dropoff_location".to_string()))?;

        let estimate = self.fare_engine.estimate(&pickup, &dropoff, &request.vehicle_type)?;
        let vehicle_class: VehicleClass = request.vehicle_type.parse()?;

        let now = Utc::now();
        let trip = Trip {
            id: String::new(),
            rider_id: principal.id.clone(),
            driver_id: None,
            pickup_location: pickup,
            stops: request.stops,
            dropoff_location: dropoff,
            vehicle_class,
            status: TripStatus::Requested,
            fare: estimate.fare,
            distance_km: estimate.distance_km,
            duration: TripDuration {
                estimated_min: estimate.estimated_duration_min,
                actual_min: None,
            },
            route: Vec::new(),
            driver_assigned_at: None,
            driver_arriving_at: None,
            driver_arrived_at: None,
            trip_started_at: None,
            trip_completed_at: None,
            cancellation_reason: None,
            payment_status: TripPaymentStatus::Pending,
            payment_id: None,
            review_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
        .with_generated_id(IdType::Trip);

        trip.validate_points()?;
        self.store.insert_trip(&trip).await?;

        tracing::info!(
            "Trip created: {} for rider {} ({} km, est. {} {})",
            trip.id, trip.rider_id, trip.distance_km, trip.fare.total_fare, trip.fare.currency
        );
        Ok(trip)
    }

    async fn estimate_fare(&self, request: FareEstimateRequest) -> Result<FareEstimate, AppError> {
        self.fare_engine
            .estimate(&request.pickup_location, &request.dropoff_location, &request.vehicle_type)
    }

    async fn get_trip(&self, trip_id: &str) -> Result<Trip, AppError> {
        if !IdGenerator::validate_id(trip_id, Some(IdType::Trip)) {
            return Err(AppError::TripNotFound(trip_id.to_string()));
        }
        self.store
            .get_trip(trip_id)
            .await?
            .ok_or_else(|| AppError::TripNotFound(trip_id.to_string()))
    }

    async fn get_trip_details(&self, principal: &Principal, trip_id: &str) -> Result<TripDetails, AppError> {
        let trip = self.get_trip(trip_id).await?;
        Self::require_participant(principal, &trip)?;

        let rider_lookup = self.store.get_rider(&trip.rider_id);
        let driver_lookup = async {
            match &trip.driver_id {
                Some(driver_id) => self.store.get_driver(driver_id).await,
                None => Ok(None),
            }
        };
        let (rider, driver) = futures::try_join!(rider_lookup, driver_lookup)?;

        Ok(TripDetails {
            rider: rider.as_ref().map(RiderSummary::from),
            driver: driver.as_ref().map(DriverProfile::from),
            trip,
        })
    }

    async fn assign_driver(&self, principal: &Principal, trip_id: &str, driver_id: &str) -> Result<Trip, AppError> {
        tracing::info!("Assigning driver {} to trip {}", driver_id, trip_id);
        principal.require_role(&[Role::Driver, Role::Admin])?;
        principal.require_self(driver_id)?;

        let current = self.get_trip(trip_id).await?;
        if current.status != TripStatus::Requested {
            return Err(AppError::TripAlreadyAssigned(trip_id.to_string()));
        }

        let driver = self.driver_service.claim_for_trip(driver_id).await?;

        let assigned = self
            .write_trip(trip_id, |trip| {
                if trip.status != TripStatus::Requested {
                    return Err(AppError::TripAlreadyAssigned(trip.id.clone()));
                }
                trip.driver_id = Some(driver.id.clone());
                trip.apply_status(TripStatus::DriverAssigned, Utc::now());
                Ok(true)
            })
            .await;

        let trip = match assigned {
            Ok((trip, _)) => trip,
            Err(e) => {
                // The driver was claimed for a trip we did not get.
                if let Err(release_err) = self.driver_service.release_from_trip(driver_id, false).await {
                    tracing::error!("Failed to release driver {} after lost assignment: {}", driver_id, release_err);
                }
                return Err(e);
            }
        };

        tracing::info!("Driver {} assigned to trip {}", driver.id, trip.id);

        if let Err(e) = self.notification_service.notify_driver_assigned(&trip, &driver).await {
            tracing::warn!("Failed to notify driver {} of assignment: {}", driver.id, e);
        }
        if let Err(e) = self.notification_service.notify_trip_status(&trip).await {
            tracing::warn!("Failed to notify rider of assignment on trip {}: {}", trip.id, e);
        }

        Ok(trip)
    }

    async fn advance_status(&self, principal: &Principal, trip_id: &str, status: TripStatus) -> Result<Trip, AppError> {
        tracing::info!("Advancing trip {} to {}", trip_id, status);

        let (trip, _) = self
            .write_trip(trip_id, |trip| {
                match status {
                    TripStatus::CancelledByRider => principal.require_self(&trip.rider_id)?,
                    _ => Self::require_trip_driver(principal, trip)?,
                }
                if !trip.status.can_advance_to(status) {
                    return Err(AppError::invalid_transition(trip.status, status));
                }
                trip.apply_status(status, Utc::now());
                Ok(true)
            })
            .await?;

        self.after_transition(&trip).await;
        Ok(trip)
    }

    async fn cancel_trip(&self, principal: &Principal, trip_id: &str, request: CancelTripRequest) -> Result<Trip, AppError> {
        let cancelled_by = match (request.cancelled_by, principal.role) {
            (Some(by), _) => by,
            (None, Role::Rider) => CancelledBy::Rider,
            (None, Role::Driver) => CancelledBy::Driver,
            (None, Role::Admin) => {
                return Err(AppError::MissingRequiredField("cancelled_by".to_string()));
            }
        };
        let target = cancelled_by.status();
        tracing::info!("Cancelling trip {} as {}", trip_id, target);

        let (trip, written) = self
            .write_trip(trip_id, |trip| {
                match cancelled_by {
                    CancelledBy::Rider => principal.require_self(&trip.rider_id)?,
                    CancelledBy::Driver => Self::require_trip_driver(principal, trip)?,
                }
                if trip.status.is_cancelled() {
                    return Ok(false);
                }
                if !trip.status.can_advance_to(target) {
                    return Err(AppError::invalid_transition(trip.status, target));
                }
                trip.cancellation_reason = request.reason.clone();
                trip.apply_status(target, Utc::now());
                Ok(true)
            })
            .await?;

        if written {
            self.after_transition(&trip).await;
        } else {
            tracing::debug!("Trip {} already cancelled ({}), nothing to do", trip.id, trip.status);
        }
        Ok(trip)
    }

    async fn append_route_point(&self, principal: &Principal, trip_id: &str, point: RoutePointRequest) -> Result<Trip, AppError> {
        let coordinates = Coordinates::new(point.longitude, point.latitude);
        coordinates.validate("coordinates")?;

        let (trip, _) = self
            .write_trip(trip_id, |trip| {
                Self::require_trip_driver(principal, trip)?;
                if !trip.status.is_in_progress() {
                    return Err(AppError::conflict(format!(
                        "Route points are not accepted while the trip is {}",
                        trip.status
                    )));
                }
                let now = Utc::now();
                trip.route.push(RoutePoint { timestamp: now, coordinates });
                trip.updated_at = now;
                Ok(true)
            })
            .await?;

        tracing::debug!("Trip {} route now has {} points", trip.id, trip.route.len());
        Ok(trip)
    }

    async fn finalize_trip(&self, principal: &Principal, trip_id: &str, request: FinalizeTripRequest) -> Result<Trip, AppError> {
        request.validate()?;
        tracing::info!("Finalizing trip {}", trip_id);

        let current = self.get_trip(trip_id).await?;
        Self::require_trip_driver(principal, &current)?;

        let distance_km = round2(request.actual_distance_km);
        let fare = match request.fare {
            Some(fare) => fare,
            None => self.fare_engine.price(
                current.vehicle_class,
                distance_km,
                request.actual_duration_min as f64,
                current.fare.surge_multiplier,
            )?,
        };

        let (trip, _) = self
            .write_trip(trip_id, |trip| {
                if trip.status != TripStatus::TripStarted {
                    return Err(AppError::invalid_transition(trip.status, TripStatus::Completed));
                }
                trip.distance_km = distance_km;
                trip.duration.actual_min = Some(request.actual_duration_min);
                trip.fare = fare.clone();
                trip.apply_status(TripStatus::Completed, Utc::now());
                Ok(true)
            })
            .await?;

        tracing::info!("Trip {} completed, fare {} {}", trip.id, trip.fare.total_fare, trip.fare.currency);
        self.after_transition(&trip).await;
        Ok(trip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::driver::DriverStatus;
    use crate::models::geo::GeoPoint;
    use crate::test_support::Harness;

    fn request() -> TripRequest {
        TripRequest {
            pickup_location: Some(GeoPoint::new(77.5946, 12.9716, "MG Road")),
            dropoff_location: Some(GeoPoint::new(77.6412, 13.0012, "Indiranagar")),
            stops: Vec::new(),
            vehicle_type: "Sedan".to_string(),
        }
    }

    async fn started_trip(h: &Harness) -> (Trip, Principal, Principal) {
        let rider = h.rider().await;
        let driver = h.driver_at(77.595, 12.972).await;
        let as_rider = Principal::new(&rider.id, Role::Rider);
        let as_driver = Principal::new(&driver.id, Role::Driver);

        let trips = &h.state.trip_service;
        let trip = trips.create_trip(&as_rider, request()).await.unwrap();
        trips.assign_driver(&as_driver, &trip.id, &driver.id).await.unwrap();
        for status in [TripStatus::DriverArriving, TripStatus::DriverArrived, TripStatus::TripStarted] {
            trips.advance_status(&as_driver, &trip.id, status).await.unwrap();
        }
        let trip = trips.get_trip(&trip.id).await.unwrap();
        (trip, as_rider, as_driver)
    }

    #[tokio::test]
    async fn test_create_stores_estimate() {
        let h = Harness::new();
        let rider = h.rider().await;
        let trip = h
            .state
            .trip_service
            .create_trip(&Principal::new(&rider.id, Role::Rider), request())
            .await
            .unwrap();

        assert_eq!(trip.status, TripStatus::Requested);
        assert_eq!(trip.distance_km, 6.03);
        assert_eq!(trip.duration.estimated_min, 12);
        assert_eq!(trip.fare.base_fare, 50);
        assert!(trip.fare.total_fare >= 146);
        assert_eq!(trip.payment_status, TripPaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_create_rejects_missing_or_bad_points() {
        let h = Harness::new();
        let rider = Principal::new("rdr-251019-a1b2c3d4", Role::Rider);

        let mut missing = request();
        missing.dropoff_location = None;
        let err = h.state.trip_service.create_trip(&rider, missing).await.unwrap_err();
        assert_eq!(err.kind(), "validation_error");

        let mut bad = request();
        bad.pickup_location = Some(GeoPoint::new(200.0, 12.0, "Nowhere"));
        let err = h.state.trip_service.create_trip(&rider, bad).await.unwrap_err();
        assert_eq!(err.kind(), "validation_error");

        let mut unknown = request();
        unknown.vehicle_type = "rickshaw".to_string();
        let err = h.state.trip_service.create_trip(&rider, unknown).await.unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[tokio::test]
    async fn test_requested_cannot_jump_to_started() {
        let h = Harness::new();
        let rider = h.rider().await;
        let as_rider = Principal::new(&rider.id, Role::Rider);
        let trip = h.state.trip_service.create_trip(&as_rider, request()).await.unwrap();

        let admin = Principal::new("admin-1", Role::Admin);
        let err = h
            .state
            .trip_service
            .advance_status(&admin, &trip.id, TripStatus::TripStarted)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_assignment_claims_driver_once() {
        let h = Harness::new();
        let rider = h.rider().await;
        let first = h.driver_at(77.595, 12.972).await;
        let second = h.driver_at(77.596, 12.973).await;
        let as_rider = Principal::new(&rider.id, Role::Rider);
        let trips = &h.state.trip_service;

        let trip = trips.create_trip(&as_rider, request()).await.unwrap();
        let assigned = trips
            .assign_driver(&Principal::new(&first.id, Role::Driver), &trip.id, &first.id)
            .await
            .unwrap();
        assert_eq!(assigned.status, TripStatus::DriverAssigned);
        assert!(assigned.driver_assigned_at.is_some());

        let busy = h.state.driver_service.get_driver(&first.id).await.unwrap();
        assert_eq!(busy.status, DriverStatus::Busy);

        let err = trips
            .assign_driver(&Principal::new(&second.id, Role::Driver), &trip.id, &second.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TripAlreadyAssigned(_)));
        let untouched = h.state.driver_service.get_driver(&second.id).await.unwrap();
        assert_eq!(untouched.status, DriverStatus::Online);

        // The busy driver cannot be claimed for a second trip.
        let other = trips.create_trip(&as_rider, request()).await.unwrap();
        let err = trips
            .assign_driver(&Principal::new(&first.id, Role::Driver), &other.id, &first.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DriverNotAvailable(_)));
    }

    #[tokio::test]
    async fn test_driver_cannot_assign_someone_else() {
        let h = Harness::new();
        let rider = h.rider().await;
        let driver = h.driver_at(77.595, 12.972).await;
        let trip = h
            .state
            .trip_service
            .create_trip(&Principal::new(&rider.id, Role::Rider), request())
            .await
            .unwrap();

        let err = h
            .state
            .trip_service
            .assign_driver(&Principal::new("drv-251019-other000", Role::Driver), &trip.id, &driver.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "forbidden");
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_frees_driver() {
        let h = Harness::new();
        let rider = h.rider().await;
        let driver = h.driver_at(77.595, 12.972).await;
        let as_rider = Principal::new(&rider.id, Role::Rider);
        let trips = &h.state.trip_service;

        let trip = trips.create_trip(&as_rider, request()).await.unwrap();
        trips
            .assign_driver(&Principal::new(&driver.id, Role::Driver), &trip.id, &driver.id)
            .await
            .unwrap();

        let cancel = || CancelTripRequest { cancelled_by: None, reason: Some("changed plans".to_string()) };
        let first = trips.cancel_trip(&as_rider, &trip.id, cancel()).await.unwrap();
        assert_eq!(first.status, TripStatus::CancelledByRider);
        let stamped = first.trip_completed_at;
        assert!(stamped.is_some());

        let second = trips.cancel_trip(&as_rider, &trip.id, cancel()).await.unwrap();
        assert_eq!(second.trip_completed_at, stamped);
        assert_eq!(second.version, first.version);

        let freed = h.state.driver_service.get_driver(&driver.id).await.unwrap();
        assert_eq!(freed.status, DriverStatus::Online);
        assert_eq!(freed.total_trips, driver.total_trips);
    }

    #[tokio::test]
    async fn test_cancel_after_no_show_is_rejected() {
        let h = Harness::new();
        let rider = h.rider().await;
        let driver = h.driver_at(77.595, 12.972).await;
        let as_rider = Principal::new(&rider.id, Role::Rider);
        let as_driver = Principal::new(&driver.id, Role::Driver);
        let trips = &h.state.trip_service;

        let trip = trips.create_trip(&as_rider, request()).await.unwrap();
        trips.assign_driver(&as_driver, &trip.id, &driver.id).await.unwrap();
        let no_show = trips.advance_status(&as_driver, &trip.id, TripStatus::NoShow).await.unwrap();
        assert_eq!(no_show.status, TripStatus::NoShow);

        let err = trips
            .cancel_trip(&as_rider, &trip.id, CancelTripRequest::default())
            .await
            .unwrap_err();
        match err {
            AppError::InvalidTransition { from, to } => {
                assert_eq!(from, "no_show");
                assert_eq!(to, "cancelled_by_rider");
            }
            other => panic!("expected invalid transition, got {:?}", other),
        }

        let stored = trips.get_trip(&trip.id).await.unwrap();
        assert_eq!(stored.status, TripStatus::NoShow);
        assert_eq!(stored.version, no_show.version);
    }

    #[tokio::test]
    async fn test_route_points_only_while_in_progress() {
        let h = Harness::new();
        let (trip, _, as_driver) = started_trip(&h).await;
        let trips = &h.state.trip_service;

        let updated = trips
            .append_route_point(&as_driver, &trip.id, RoutePointRequest { longitude: 77.6, latitude: 12.98 })
            .await
            .unwrap();
        assert_eq!(updated.route.len(), 1);

        let err = trips
            .append_route_point(&as_driver, &trip.id, RoutePointRequest { longitude: 77.6, latitude: 98.0 })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");

        trips
            .finalize_trip(&as_driver, &trip.id, FinalizeTripRequest {
                actual_distance_km: 6.5,
                actual_duration_min: 15,
                fare: None,
            })
            .await
            .unwrap();
        let err = trips
            .append_route_point(&as_driver, &trip.id, RoutePointRequest { longitude: 77.6, latitude: 12.98 })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn test_finalize_prices_actuals_with_estimate_surge() {
        let h = Harness::new();
        let (trip, _, as_driver) = started_trip(&h).await;

        let done = h
            .state
            .trip_service
            .finalize_trip(&as_driver, &trip.id, FinalizeTripRequest {
                actual_distance_km: 6.03,
                actual_duration_min: 12,
                fare: None,
            })
            .await
            .unwrap();

        let expected = ((50.0 + 6.03 * 12.0 + 24.0) * trip.fare.surge_multiplier).round() as i64;
        assert_eq!(done.status, TripStatus::Completed);
        assert_eq!(done.fare.total_fare, expected);
        assert_eq!(done.duration.actual_min, Some(12));
        assert!(done.trip_completed_at.is_some());

        let driver = h.state.driver_service.get_driver(done.driver_id.as_deref().unwrap()).await.unwrap();
        assert_eq!(driver.status, DriverStatus::Online);
        assert_eq!(driver.total_trips, 1);

        let err = h
            .state
            .trip_service
            .advance_status(&as_driver, &trip.id, TripStatus::NoShow)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_finalize_requires_started_trip() {
        let h = Harness::new();
        let rider = h.rider().await;
        let trip = h
            .state
            .trip_service
            .create_trip(&Principal::new(&rider.id, Role::Rider), request())
            .await
            .unwrap();

        let err = h
            .state
            .trip_service
            .finalize_trip(&Principal::new("admin-1", Role::Admin), &trip.id, FinalizeTripRequest {
                actual_distance_km: 1.0,
                actual_duration_min: 2,
                fare: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_details_join_rider_and_driver() {
        let h = Harness::new();
        let (trip, as_rider, _) = started_trip(&h).await;

        let details = h.state.trip_service.get_trip_details(&as_rider, &trip.id).await.unwrap();
        assert_eq!(details.rider.unwrap().id, as_rider.id);
        assert!(details.driver.is_some());

        let stranger = Principal::new("rdr-251019-stranger", Role::Rider);
        let err = h.state.trip_service.get_trip_details(&stranger, &trip.id).await.unwrap_err();
        assert_eq!(err.kind(), "forbidden");
    }

    #[tokio::test]
    async fn test_notifier_failures_do_not_fail_transitions() {
        let h = Harness::with_failing_notifier();
        let (trip, _, _) = started_trip(&h).await;
        assert_eq!(trip.status, TripStatus::TripStarted);
        assert!(h.notifier.sent_count() > 0);
    }
}
