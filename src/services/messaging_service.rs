// src/services/messaging_service.rs
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing;

use crate::{
    errors::SparrowError as AppError,
    models::{driver::Driver, payment::Payment, trip::{Trip, TripStatus}},
    services::store_service::RideStore,
};

#[derive(Debug, Clone)]
pub struct FcmConfig {
    pub fcm_server_key: String,
    pub fcm_url: String,
}

impl FcmConfig {
    pub fn with_server_key(fcm_server_key: impl Into<String>) -> Self {
        Self {
            fcm_server_key: fcm_server_key.into(),
            fcm_url: "https://fcm.googleapis.com/fcm/send".to_string(),
        }
    }
}

/// Push notifications to riders and drivers. Callers treat every error as non-fatal.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn send_to_device(&self, device_token: &str, message: NotificationMessage) -> Result<(), AppError>;
    async fn notify_driver_assigned(&self, trip: &Trip, driver: &Driver) -> Result<(), AppError>;
    async fn notify_trip_status(&self, trip: &Trip) -> Result<(), AppError>;
    async fn notify_payment_received(&self, payment: &Payment) -> Result<(), AppError>;
}

#[derive(Debug, Clone)]
pub struct NotificationMessage {
    pub title: String,
    pub body: String,
    pub data: Option<serde_json::Value>,
    pub priority: NotificationPriority,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum NotificationPriority {
    Normal,
    #[default]
    High, // Will wake sleeping devices
}

impl NotificationMessage {
    pub fn new(title: &str, body: &str) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
            data: None,
            priority: NotificationPriority::default(),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Rider-facing wording for a trip status.
fn trip_status_message(trip: &Trip) -> NotificationMessage {
    let (title, body) = match trip.status {
        TripStatus::DriverAssigned => ("Driver Assigned", "A driver has accepted your trip".to_string()),
        TripStatus::DriverArriving => ("Driver On The Way", "Your driver is heading to the pickup point".to_string()),
        TripStatus::DriverArrived => ("Driver Arrived", "Your driver is waiting at the pickup point".to_string()),
        TripStatus::TripStarted => ("Trip Started", format!("Heading to {}", trip.dropoff_location.address)),
        TripStatus::Completed => ("Trip Completed", format!("Fare: {} {}", trip.fare.total_fare, trip.fare.currency.to_uppercase())),
        TripStatus::CancelledByDriver => ("Trip Cancelled", "Your driver cancelled the trip".to_string()),
        TripStatus::CancelledByRider => ("Trip Cancelled", "Your trip was cancelled".to_string()),
        TripStatus::NoShow => ("Trip Closed", "The driver could not find you at pickup".to_string()),
        TripStatus::Requested => ("Trip Requested", "Looking for a driver".to_string()),
    };

    NotificationMessage::new(title, &body)
        .with_data(json!({
            "type": "trip_status",
            "trip_id": trip.id,
            "status": trip.status,
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .with_priority(NotificationPriority::Normal)
}

pub struct FcmNotificationService {
    config: FcmConfig,
    client: reqwest::Client,
    store: Arc<dyn RideStore>,
}

impl FcmNotificationService {
    pub fn new(config: FcmConfig, store: Arc<dyn RideStore>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            store,
        }
    }

    async fn rider_device_token(&self, rider_id: &str) -> Result<String, AppError> {
        let rider = self
            .store
            .get_rider(rider_id)
            .await?
            .ok_or_else(|| AppError::RiderNotFound(rider_id.to_string()))?;
        rider
            .device_token
            .ok_or_else(|| AppError::FcmInvalidToken("Rider has no device token".to_string()))
    }

    async fn driver_device_token(&self, driver_id: &str) -> Result<String, AppError> {
        let driver = self
            .store
            .get_driver(driver_id)
            .await?
            .ok_or_else(|| AppError::DriverNotFound(driver_id.to_string()))?;
        driver
            .device_token
            .ok_or_else(|| AppError::FcmInvalidToken("Driver has no device token".to_string()))
    }
}

#[async_trait]
impl NotificationService for FcmNotificationService {
    async fn send_to_device(&self, device_token: &str, message: NotificationMessage) -> Result<(), AppError> {
        if device_token.is_empty() {
            return Err(AppError::FcmInvalidToken("Empty device token".to_string()));
        }

        tracing::info!("Sending FCM notification to device: {}", device_token);

        let mut fcm_message = json!({
            "to": device_token,
            "notification": {
                "title": message.title,
                "body": message.body,
                "sound": "default"
            },
            "priority": match message.priority {
                NotificationPriority::High => "high",
                NotificationPriority::Normal => "normal",
            }
        });

        if let Some(data) = message.data {
            fcm_message["data"] = data;
        }

        let response = self
            .client
            .post(&self.config.fcm_url)
            .header("Authorization", format!("key={}", self.config.fcm_server_key))
            .json(&fcm_message)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("FCM request failed: {}", error_text);
            return Err(AppError::FcmDelivery(error_text));
        }

        tracing::debug!("FCM notification sent successfully");
        Ok(())
    }

    async fn notify_driver_assigned(&self, trip: &Trip, driver: &Driver) -> Result<(), AppError> {
        let message = NotificationMessage::new(
            "New Trip Assigned",
            &format!(
                "Pickup at {} - est. {} {}",
                trip.pickup_location.address,
                trip.fare.total_fare,
                trip.fare.currency.to_uppercase()
            ),
        )
        .with_data(json!({
            "type": "driver_assigned",
            "trip_id": trip.id,
            "pickup_address": trip.pickup_location.address,
            "dropoff_address": trip.dropoff_location.address,
            "estimated_fare": trip.fare.total_fare,
        }));

        let token = self.driver_device_token(&driver.id).await?;
        self.send_to_device(&token, message).await
    }

    async fn notify_trip_status(&self, trip: &Trip) -> Result<(), AppError> {
        let token = self.rider_device_token(&trip.rider_id).await?;
        self.send_to_device(&token, trip_status_message(trip)).await
    }

    async fn notify_payment_received(&self, payment: &Payment) -> Result<(), AppError> {
        let message = NotificationMessage::new(
            "Payment Received",
            &format!("You earned {} {}", payment.driver_earnings, payment.currency.to_uppercase()),
        )
        .with_data(json!({
            "type": "payment_received",
            "payment_id": payment.id,
            "trip_id": payment.trip_id,
            "driver_earnings": payment.driver_earnings,
            "tip_amount": payment.tip_amount,
        }))
        .with_priority(NotificationPriority::Normal);

        let token = self.driver_device_token(&payment.driver_id).await?;
        self.send_to_device(&token, message).await
    }
}

/// Logs instead of sending. Can be told to fail so callers' error swallowing is testable.
#[derive(Debug, Default)]
pub struct MockNotificationService {
    fail: bool,
    sent: AtomicUsize,
}

impl MockNotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true, sent: AtomicUsize::new(0) }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    fn record(&self, what: String) -> Result<(), AppError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::FcmDelivery(format!("mock failure: {}", what)));
        }
        tracing::info!("[MOCK] {}", what);
        Ok(())
    }
}

#[async_trait]
impl NotificationService for MockNotificationService {
    async fn send_to_device(&self, device_token: &str, message: NotificationMessage) -> Result<(), AppError> {
        self.record(format!("Would send FCM to {}: {} - {}", device_token, message.title, message.body))
    }

    async fn notify_driver_assigned(&self, trip: &Trip, driver: &Driver) -> Result<(), AppError> {
        self.record(format!("Driver assigned: {} to trip {}", driver.id, trip.id))
    }

    async fn notify_trip_status(&self, trip: &Trip) -> Result<(), AppError> {
        self.record(format!("Status update for trip {}: {}", trip.id, trip.status))
    }

    async fn notify_payment_received(&self, payment: &Payment) -> Result<(), AppError> {
        self.record(format!("Payment {} received for trip {}", payment.id, payment.trip_id))
    }
}
