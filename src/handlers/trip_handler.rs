// src/handlers/trip_handler.rs
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::{
    errors::SparrowError as AppError,
    models::{
        fare::{FareEstimate, FareEstimateRequest},
        identity::Principal,
        review::{Review, ReviewRequest},
        trip::{
            AssignDriverRequest, CancelTripRequest, FinalizeTripRequest, RoutePointRequest, Trip,
            TripDetails, TripRequest, TripStatusUpdate,
        },
    },
    services::{review_service::ReviewOperations, trip_service::TripOperations},
    state::AppState,
};

pub async fn create_trip(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(request): Json<TripRequest>,
) -> Result<(StatusCode, Json<Trip>), AppError> {
    let trip = state.trip_service.create_trip(&principal, request).await?;
    Ok((StatusCode::CREATED, Json(trip)))
}

pub async fn estimate_fare(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FareEstimateRequest>,
) -> Result<Json<FareEstimate>, AppError> {
    let estimate = state.trip_service.estimate_fare(request).await?;
    Ok(Json(estimate))
}

pub async fn get_trip(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(trip_id): Path<String>,
) -> Result<Json<TripDetails>, AppError> {
    let details = state.trip_service.get_trip_details(&principal, &trip_id).await?;
    Ok(Json(details))
}

pub async fn assign_driver(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(trip_id): Path<String>,
    Json(request): Json<AssignDriverRequest>,
) -> Result<Json<Trip>, AppError> {
    let trip = state
        .trip_service
        .assign_driver(&principal, &trip_id, &request.driver_id)
        .await?;
    Ok(Json(trip))
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(trip_id): Path<String>,
    Json(update): Json<TripStatusUpdate>,
) -> Result<Json<Trip>, AppError> {
    let trip = state
        .trip_service
        .advance_status(&principal, &trip_id, update.status)
        .await?;
    Ok(Json(trip))
}

pub async fn cancel_trip(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(trip_id): Path<String>,
    Json(request): Json<CancelTripRequest>,
) -> Result<Json<Trip>, AppError> {
    let trip = state.trip_service.cancel_trip(&principal, &trip_id, request).await?;
    Ok(Json(trip))
}

pub async fn append_route_point(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(trip_id): Path<String>,
    Json(point): Json<RoutePointRequest>,
) -> Result<Json<Trip>, AppError> {
    let trip = state
        .trip_service
        .append_route_point(&principal, &trip_id, point)
        .await?;
    Ok(Json(trip))
}

pub async fn finalize_trip(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(trip_id): Path<String>,
    Json(request): Json<FinalizeTripRequest>,
) -> Result<Json<Trip>, AppError> {
    let trip = state.trip_service.finalize_trip(&principal, &trip_id, request).await?;
    Ok(Json(trip))
}

pub async fn submit_review(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(trip_id): Path<String>,
    Json(request): Json<ReviewRequest>,
) -> Result<(StatusCode, Json<Review>), AppError> {
    let review = state
        .review_service
        .submit_review(&principal, &trip_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(review)))
}
