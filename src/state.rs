// src/state.rs
use std::sync::Arc;

use crate::{
    config::AppConfig,
    errors::SparrowResult,
    services::{
        driver_service::DriverService,
        fare_engine::FareEngine,
        geo_matcher::GeoMatcher,
        messaging_service::{FcmConfig, FcmNotificationService, MockNotificationService, NotificationService},
        payment_service::{PaymentService, PaymentSettings},
        processor_service::{MockPaymentProcessor, PaymentProcessor, StripeConfig, StripeProcessor},
        review_service::ReviewService,
        rider_service::RiderService,
        store_service::{MemoryStore, RedisStore, RideStore},
        trip_service::TripService,
    },
};

pub struct AppState {
    pub rider_service: Arc<RiderService>,
    pub driver_service: Arc<DriverService>,
    pub trip_service: Arc<TripService>,
    pub payment_service: Arc<PaymentService>,
    pub review_service: Arc<ReviewService>,
    pub geo_matcher: Arc<GeoMatcher>,
    pub fare_engine: Arc<FareEngine>,
    pub store: Arc<dyn RideStore>,
    pub notification_service: Arc<dyn NotificationService>,
    pub config: AppConfig,
}

impl AppState {
    pub async fn new(config: AppConfig) -> SparrowResult<Self> {
        let store: Arc<dyn RideStore> = match &config.redis_url {
            Some(url) => Arc::new(RedisStore::connect(url).await?),
            None => {
                tracing::warn!("REDIS_URL not set, using in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        let processor: Arc<dyn PaymentProcessor> = match &config.stripe_secret_key {
            Some(secret_key) => Arc::new(StripeProcessor::new(StripeConfig {
                secret_key: secret_key.clone(),
                api_base: config.stripe_api_base.clone(),
            })),
            None => {
                tracing::warn!("STRIPE_SECRET_KEY not set, using mock payment processor");
                Arc::new(MockPaymentProcessor::new())
            }
        };

        let notification_service: Arc<dyn NotificationService> = match &config.fcm_server_key {
            Some(server_key) => Arc::new(FcmNotificationService::new(
                FcmConfig::with_server_key(server_key.clone()),
                store.clone(),
            )),
            None => {
                tracing::warn!("FCM_SERVER_KEY not set, using mock notification service");
                Arc::new(MockNotificationService::new())
            }
        };

        Ok(Self::with_backends(config, store, processor, notification_service))
    }

    /// Wires the services over already-built collaborators.
    pub fn with_backends(
        config: AppConfig,
        store: Arc<dyn RideStore>,
        processor: Arc<dyn PaymentProcessor>,
        notification_service: Arc<dyn NotificationService>,
    ) -> Self {
        let fare_engine = Arc::new(FareEngine::new(config.market_offset, config.currency.clone()));
        let geo_matcher = Arc::new(GeoMatcher::new(store.clone()));
        let rider_service = Arc::new(RiderService::new(store.clone()));
        let driver_service = Arc::new(DriverService::new(store.clone()));

        let trip_service = Arc::new(TripService::new(
            store.clone(),
            fare_engine.clone(),
            driver_service.clone(),
            notification_service.clone(),
        ));

        let payment_service = Arc::new(PaymentService::new(
            store.clone(),
            processor,
            rider_service.clone(),
            notification_service.clone(),
            PaymentSettings::from(&config),
        ));

        let review_service = Arc::new(ReviewService::new(store.clone(), driver_service.clone()));

        Self {
            rider_service,
            driver_service,
            trip_service,
            payment_service,
            review_service,
            geo_matcher,
            fare_engine,
            store,
            notification_service,
            config,
        }
    }
}
