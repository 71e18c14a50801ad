// src/handlers/mod.rs
pub mod auth;
pub mod driver_handler;
pub mod payment_handler;
pub mod rider_handler;
pub mod trip_handler;

use axum::{
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        // Riders
        .route("/riders", post(rider_handler::register_rider))
        .route("/riders/nearby-drivers", get(rider_handler::nearby_drivers))
        // Drivers
        .route("/drivers", post(driver_handler::register_driver))
        .route("/drivers/:id/location", patch(driver_handler::update_location))
        .route("/drivers/:id/status", patch(driver_handler::update_status))
        .route("/drivers/:id/approval", patch(driver_handler::set_approval))
        .route("/drivers/:id/earnings", get(driver_handler::earnings))
        .route("/drivers/:id/reviews", get(driver_handler::reviews))
        // Trips
        .route("/trips", post(trip_handler::create_trip))
        .route("/trips/fare-estimate", post(trip_handler::estimate_fare))
        .route("/trips/:id", get(trip_handler::get_trip))
        .route("/trips/:id/assign", patch(trip_handler::assign_driver))
        .route("/trips/:id/status", patch(trip_handler::update_status))
        .route("/trips/:id/cancel", patch(trip_handler::cancel_trip))
        .route("/trips/:id/route", post(trip_handler::append_route_point))
        .route("/trips/:id/finalize", patch(trip_handler::finalize_trip))
        .route("/trips/:id/review", post(trip_handler::submit_review))
        // Payments
        .route("/payments/create-session", post(payment_handler::create_checkout_session))
        .route("/payments/create-payment-intent", post(payment_handler::create_payment_intent))
        .route("/payments/confirm-payment/:intent_id", post(payment_handler::confirm_payment))
        .route("/payments/success", get(payment_handler::checkout_success))
        .route("/payments/cancel", get(payment_handler::checkout_cancel))
        .route("/payments/webhook", post(payment_handler::webhook))
        .route("/payments/tip", post(payment_handler::process_tip))
        .route("/payments/history", get(payment_handler::payment_history))
        .route("/payments/payment/:id", get(payment_handler::payment_details))
        .route(
            "/payments/payment-methods",
            get(payment_handler::list_payment_methods).post(payment_handler::add_payment_method),
        )
        .route("/payments/payment-methods/:id", delete(payment_handler::remove_payment_method))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
