// src/test_support.rs
//! Fixtures shared by the unit tests: sample documents and a fully wired state over the
//! in-memory store, the mock processor and the mock notifier.

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::{
    config::AppConfig,
    models::{
        driver::{Driver, DriverStatus, Vehicle},
        fare::{FareBreakdown, VehicleClass},
        geo::{Coordinates, GeoPoint},
        identity::{Principal, Role},
        payment::{split_fees, Payment, PaymentStatus, PaymentType},
        rider::{Rider, RiderRegistration},
        trip::{Trip, TripDuration, TripPaymentStatus, TripStatus},
    },
    services::{
        messaging_service::MockNotificationService,
        processor_service::MockPaymentProcessor,
        rider_service::RiderOperations,
        store_service::{MemoryStore, RideStore},
    },
    state::AppState,
    utils::id_generator::{IdGenerator, IdType, WithGeneratedId},
};

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test";

pub fn test_config() -> AppConfig {
    AppConfig {
        stripe_webhook_secret: Some(TEST_WEBHOOK_SECRET.to_string()),
        promo_codes: "RIDE10:10%,FLAT50:50".parse().unwrap(),
        ..AppConfig::default()
    }
}

/// An approved, active, online sedan driver at `[longitude, latitude]`.
pub fn sample_driver(longitude: f64, latitude: f64) -> Driver {
    let now = Utc::now();
    Driver {
        id: String::new(),
        name: "Ravi Kumar".to_string(),
        email: "ravi@example.com".to_string(),
        phone_number: "+919811111111".to_string(),
        photo: None,
        status: DriverStatus::Online,
        current_location: Some(Coordinates::new(longitude, latitude)),
        vehicle: Vehicle {
            make: "Maruti".to_string(),
            model: "Dzire".to_string(),
            license_plate: "KA01AB1234".to_string(),
            vehicle_class: VehicleClass::Sedan,
        },
        is_active: true,
        is_approved: true,
        total_trips: 0,
        acceptance_rate: 100.0,
        cancellation_rate: 0.0,
        rating: 0.0,
        rating_count: 0,
        device_token: Some("driver-device".to_string()),
        last_active_at: Some(now),
        version: 0,
        created_at: now,
        updated_at: now,
    }
    .with_generated_id(IdType::Driver)
}

/// Sedan fare for 6.03 km and 12 minutes without surge.
pub fn sample_fare() -> FareBreakdown {
    FareBreakdown {
        base_fare: 50,
        distance_fare: 72,
        time_fare: 24,
        surge_multiplier: 1.0,
        total_fare: 146,
        currency: "inr".to_string(),
    }
}

/// A requested trip across central Bangalore.
pub fn sample_trip(rider_id: &str) -> Trip {
    let now = Utc::now();
    Trip {
        id: String::new(),
        rider_id: rider_id.to_string(),
        driver_id: None,
        pickup_location: GeoPoint::new(77.5946, 12.9716, "MG Road"),
        stops: Vec::new(),
        dropoff_location: GeoPoint::new(77.6412, 13.0012, "Indiranagar"),
        vehicle_class: VehicleClass::Sedan,
        status: TripStatus::Requested,
        fare: sample_fare(),
        distance_km: 6.03,
        duration: TripDuration {
            estimated_min: 12,
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
    .with_generated_id(IdType::Trip)
}

/// A fresh trip payment with the standard split, for its own trip.
pub fn sample_payment(base_fare: i64, tip_amount: i64) -> Payment {
    let now = Utc::now();
    let amount = base_fare + tip_amount;
    let (platform_fee, driver_earnings) = split_fees(amount, tip_amount);
    Payment {
        id: String::new(),
        rider_id: "rdr-251019-a1b2c3d4".to_string(),
        driver_id: "drv-251019-a1b2c3d4".to_string(),
        trip_id: IdGenerator::generate(IdType::Trip),
        payment_type: PaymentType::TripPayment,
        amount,
        base_fare,
        tip_amount,
        discount: 0,
        promo_code: None,
        platform_fee,
        driver_earnings,
        refunded_amount: 0,
        currency: "inr".to_string(),
        status: PaymentStatus::Created,
        checkout_session_id: None,
        checkout_url: None,
        payment_intent_id: None,
        stripe_customer_id: None,
        payment_method_id: None,
        failure_reason: None,
        expires_at: Some(now + Duration::minutes(30)),
        completed_at: None,
        failed_at: None,
        cancelled_at: None,
        expired_at: None,
        version: 0,
        created_at: now,
        updated_at: now,
    }
    .with_generated_id(IdType::Payment)
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub processor: Arc<MockPaymentProcessor>,
    pub notifier: Arc<MockNotificationService>,
    pub state: Arc<AppState>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(Arc::new(MockPaymentProcessor::new()), Arc::new(MockNotificationService::new()))
    }

    pub fn with_failing_notifier() -> Self {
        Self::build(Arc::new(MockPaymentProcessor::new()), Arc::new(MockNotificationService::failing()))
    }

    pub fn with_processor(processor: Arc<MockPaymentProcessor>) -> Self {
        Self::build(processor, Arc::new(MockNotificationService::new()))
    }

    fn build(processor: Arc<MockPaymentProcessor>, notifier: Arc<MockNotificationService>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::with_backends(test_config(), store.clone(), processor.clone(), notifier.clone());
        Self {
            store,
            processor,
            notifier,
            state: Arc::new(state),
        }
    }

    pub async fn rider(&self) -> Rider {
        self.state
            .rider_service
            .register_rider(RiderRegistration {
                name: "Asha Rao".to_string(),
                email: "asha@example.com".to_string(),
                phone_number: "+919800000000".to_string(),
                device_token: Some("rider-device".to_string()),
            })
            .await
            .unwrap()
    }

    pub async fn driver_at(&self, longitude: f64, latitude: f64) -> Driver {
        let driver = sample_driver(longitude, latitude);
        self.store.insert_driver(&driver).await.unwrap();
        driver
    }

    /// A stored, unassigned trip and its rider.
    pub async fn requested_trip(&self) -> (Trip, Principal) {
        let rider = Principal::new(self.rider().await.id, Role::Rider);
        let trip = sample_trip(&rider.id);
        self.store.insert_trip(&trip).await.unwrap();
        (trip, rider)
    }

    /// A completed trip priced at `total_fare`, for a new rider and a new driver.
    pub async fn completed_trip(&self, total_fare: i64) -> (Trip, Principal) {
        let rider = Principal::new(self.rider().await.id, Role::Rider);
        let trip = self.completed_trip_for(&rider, total_fare).await;
        (trip, rider)
    }

    pub async fn completed_trip_for(&self, rider: &Principal, total_fare: i64) -> Trip {
        let driver = self.driver_at(77.595, 12.972).await;
        self.completed_trip_with(rider, &driver.id, total_fare).await
    }

    pub async fn completed_trip_with(&self, rider: &Principal, driver_id: &str, total_fare: i64) -> Trip {
        let now = Utc::now();
        let mut trip = sample_trip(&rider.id);
        trip.driver_id = Some(driver_id.to_string());
        trip.status = TripStatus::Completed;
        trip.fare.distance_fare = total_fare - trip.fare.base_fare - trip.fare.time_fare;
        trip.fare.total_fare = total_fare;
        trip.duration.actual_min = Some(12);
        trip.driver_assigned_at = Some(now - Duration::minutes(25));
        trip.trip_started_at = Some(now - Duration::minutes(12));
        trip.trip_completed_at = Some(now);
        self.store.insert_trip(&trip).await.unwrap();
        trip
    }
}
