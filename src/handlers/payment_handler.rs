// src/handlers/payment_handler.rs
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;

use crate::{
    errors::SparrowError as AppError,
    models::{
        identity::Principal,
        payment::{
            CheckoutRequest, CheckoutSession, Payment, PaymentIntentRequest, PaymentIntentResponse,
            PaymentMethodRequest, PaymentQuery, ReconcileOutcome, TipRequest, WebhookAck,
        },
    },
    services::{payment_service::PaymentOperations, processor_service::PaymentMethodSummary},
    state::AppState,
};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

pub async fn create_checkout_session(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutSession>, AppError> {
    let session = state.payment_service.open_checkout(&principal, request).await?;
    Ok(Json(session))
}

pub async fn create_payment_intent(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(request): Json<PaymentIntentRequest>,
) -> Result<Json<PaymentIntentResponse>, AppError> {
    let response = state.payment_service.open_payment_intent(&principal, request).await?;
    Ok(Json(response))
}

pub async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(intent_id): Path<String>,
) -> Result<Json<PaymentIntentResponse>, AppError> {
    let response = state
        .payment_service
        .confirm_payment_intent(&principal, &intent_id)
        .await?;
    Ok(Json(response))
}

pub async fn checkout_success(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Query(query): Query<PaymentQuery>,
) -> Result<Json<ReconcileOutcome>, AppError> {
    let outcome = state
        .payment_service
        .confirm_checkout_success(&principal, &query.payment_id)
        .await?;
    Ok(Json(outcome))
}

pub async fn checkout_cancel(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Query(query): Query<PaymentQuery>,
) -> Result<Json<Payment>, AppError> {
    let payment = state
        .payment_service
        .cancel_checkout(&principal, &query.payment_id)
        .await?;
    Ok(Json(payment))
}

/// Needs the raw body: the signature covers the exact bytes the processor sent.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let ack = state.payment_service.handle_processor_event(&body, signature).await?;
    Ok(Json(ack))
}

pub async fn process_tip(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(request): Json<TipRequest>,
) -> Result<Json<PaymentIntentResponse>, AppError> {
    let response = state.payment_service.process_tip(&principal, request).await?;
    Ok(Json(response))
}

pub async fn payment_history(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Vec<Payment>>, AppError> {
    let payments = state.payment_service.payment_history(&principal).await?;
    Ok(Json(payments))
}

pub async fn payment_details(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(payment_id): Path<String>,
) -> Result<Json<Payment>, AppError> {
    let payment = state.payment_service.payment_details(&principal, &payment_id).await?;
    Ok(Json(payment))
}

pub async fn list_payment_methods(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Vec<PaymentMethodSummary>>, AppError> {
    let methods = state.payment_service.list_payment_methods(&principal).await?;
    Ok(Json(methods))
}

pub async fn add_payment_method(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(request): Json<PaymentMethodRequest>,
) -> Result<(StatusCode, Json<PaymentMethodSummary>), AppError> {
    let method = state
        .payment_service
        .add_payment_method(&principal, &request.payment_method_id)
        .await?;
    Ok((StatusCode::CREATED, Json(method)))
}

pub async fn remove_payment_method(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(payment_method_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state
        .payment_service
        .remove_payment_method(&principal, &payment_method_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
