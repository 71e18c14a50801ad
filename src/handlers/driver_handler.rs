// src/handlers/driver_handler.rs
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::{
    errors::SparrowError as AppError,
    models::{
        driver::{Driver, DriverApprovalUpdate, DriverEarnings, DriverLocationUpdate, DriverRegistration, DriverStatusUpdate},
        identity::{Principal, Role},
        review::Review,
    },
    services::{
        driver_service::DriverOperations, payment_service::PaymentOperations,
        review_service::ReviewOperations,
    },
    state::AppState,
};

pub async fn register_driver(
    State(state): State<Arc<AppState>>,
    Json(registration): Json<DriverRegistration>,
) -> Result<(StatusCode, Json<Driver>), AppError> {
    let driver = state.driver_service.register_driver(registration).await?;
    Ok((StatusCode::CREATED, Json(driver)))
}

pub async fn update_location(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(driver_id): Path<String>,
    Json(update): Json<DriverLocationUpdate>,
) -> Result<Json<Driver>, AppError> {
    principal.require_role(&[Role::Driver, Role::Admin])?;
    principal.require_self(&driver_id)?;
    let driver = state.driver_service.update_driver_location(&driver_id, update).await?;
    Ok(Json(driver))
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(driver_id): Path<String>,
    Json(update): Json<DriverStatusUpdate>,
) -> Result<Json<Driver>, AppError> {
    principal.require_role(&[Role::Driver, Role::Admin])?;
    principal.require_self(&driver_id)?;
    let driver = state.driver_service.update_driver_status(&driver_id, update.status).await?;
    Ok(Json(driver))
}

pub async fn set_approval(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(driver_id): Path<String>,
    Json(update): Json<DriverApprovalUpdate>,
) -> Result<Json<Driver>, AppError> {
    principal.require_role(&[Role::Admin])?;
    let driver = state.driver_service.set_driver_approval(&driver_id, update.approved).await?;
    Ok(Json(driver))
}

pub async fn earnings(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(driver_id): Path<String>,
) -> Result<Json<DriverEarnings>, AppError> {
    let earnings = state.payment_service.driver_earnings(&principal, &driver_id).await?;
    Ok(Json(earnings))
}

pub async fn reviews(
    State(state): State<Arc<AppState>>,
    _principal: Principal,
    Path(driver_id): Path<String>,
) -> Result<Json<Vec<Review>>, AppError> {
    let reviews = state.review_service.driver_reviews(&driver_id).await?;
    Ok(Json(reviews))
}
