// src/handlers/rider_handler.rs
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::{
    errors::SparrowError as AppError,
    models::{
        driver::NearbyDriver,
        geo::Coordinates,
        identity::Principal,
        rider::{Rider, RiderRegistration},
    },
    services::{geo_matcher::MatchOperations, rider_service::RiderOperations},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct NearbyDriversQuery {
    pub lat: f64,
    pub lng: f64,
    /// Metres.
    pub radius: Option<f64>,
}

pub async fn register_rider(
    State(state): State<Arc<AppState>>,
    Json(registration): Json<RiderRegistration>,
) -> Result<(StatusCode, Json<Rider>), AppError> {
    let rider = state.rider_service.register_rider(registration).await?;
    Ok((StatusCode::CREATED, Json(rider)))
}

pub async fn nearby_drivers(
    State(state): State<Arc<AppState>>,
    _principal: Principal,
    Query(query): Query<NearbyDriversQuery>,
) -> Result<Json<Vec<NearbyDriver>>, AppError> {
    let point = Coordinates::new(query.lng, query.lat);
    let drivers = state.geo_matcher.find_nearby(point, query.radius).await?;
    Ok(Json(drivers))
}
