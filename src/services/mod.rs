pub mod driver_service;
pub mod fare_engine;
pub mod geo_matcher;
pub mod messaging_service;
pub mod payment_service;
pub mod processor_service;
pub mod review_service;
pub mod rider_service;
pub mod store_service;
pub mod trip_service;
