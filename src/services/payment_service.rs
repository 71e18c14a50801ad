// src/services/payment_service.rs
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing;

use crate::{
    config::{AppConfig, PromoCatalogue},
    errors::SparrowError as AppError,
    models::{
        driver::DriverEarnings,
        geo::round2,
        identity::{Principal, Role},
        payment::{
            split_fees, CheckoutRequest, CheckoutSession, IntentSummary, Payment,
            PaymentIntentRequest, PaymentIntentResponse, PaymentStatus, PaymentType,
            ReconcileOutcome, ReconcileSource, TipRequest, WebhookAck,
        },
        rider::Rider,
        trip::{Trip, TripPaymentStatus, TripStatus},
    },
    services::{
        messaging_service::NotificationService,
        processor_service::{
            CheckoutSessionRequest, PaymentIntentParams, PaymentMethodSummary, PaymentProcessor,
            ProcessorEvent, ProcessorIntent,
        },
        rider_service::{RiderOperations, RiderService},
        store_service::{RideStore, MAX_WRITE_ATTEMPTS},
    },
    utils::{
        id_generator::{IdGenerator, IdType, WithGeneratedId},
        signature,
    },
};

/// The slice of configuration the ledger needs.
#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub currency: String,
    pub frontend_url: String,
    pub checkout_ttl: Duration,
    /// Webhooks are refused while this is unset.
    pub webhook_secret: Option<String>,
    pub webhook_tolerance_secs: i64,
    pub promo_codes: PromoCatalogue,
}

impl From<&AppConfig> for PaymentSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            currency: config.currency.clone(),
            frontend_url: config.frontend_url.trim_end_matches('/').to_string(),
            checkout_ttl: config.checkout_ttl(),
            webhook_secret: config.stripe_webhook_secret.clone(),
            webhook_tolerance_secs: config.webhook_tolerance_secs,
            promo_codes: config.promo_codes.clone(),
        }
    }
}

#[async_trait]
pub trait PaymentOperations: Send + Sync {
    async fn open_checkout(&self, principal: &Principal, request: CheckoutRequest) -> Result<CheckoutSession, AppError>;
    async fn open_payment_intent(&self, principal: &Principal, request: PaymentIntentRequest) -> Result<PaymentIntentResponse, AppError>;
    async fn confirm_payment_intent(&self, principal: &Principal, intent_id: &str) -> Result<PaymentIntentResponse, AppError>;
    async fn process_tip(&self, principal: &Principal, request: TipRequest) -> Result<PaymentIntentResponse, AppError>;
    /// Applies a completed payment to the payment, trip and rider documents exactly once,
    /// however many times and from however many triggers it is called.
    async fn reconcile_completion(&self, payment_id: &str, source: ReconcileSource) -> Result<ReconcileOutcome, AppError>;
    /// The rider's browser came back from checkout.
    async fn confirm_checkout_success(&self, principal: &Principal, payment_id: &str) -> Result<ReconcileOutcome, AppError>;
    async fn cancel_checkout(&self, principal: &Principal, payment_id: &str) -> Result<Payment, AppError>;
    async fn handle_processor_event(&self, payload: &[u8], signature_header: Option<&str>) -> Result<WebhookAck, AppError>;
    async fn expire_stale_checkouts(&self, now: DateTime<Utc>) -> Result<usize, AppError>;
    async fn payment_history(&self, principal: &Principal) -> Result<Vec<Payment>, AppError>;
    async fn payment_details(&self, principal: &Principal, payment_id: &str) -> Result<Payment, AppError>;
    async fn driver_earnings(&self, principal: &Principal, driver_id: &str) -> Result<DriverEarnings, AppError>;
    async fn list_payment_methods(&self, principal: &Principal) -> Result<Vec<PaymentMethodSummary>, AppError>;
    async fn add_payment_method(&self, principal: &Principal, payment_method_id: &str) -> Result<PaymentMethodSummary, AppError>;
    async fn remove_payment_method(&self, principal: &Principal, payment_method_id: &str) -> Result<(), AppError>;
}

pub struct PaymentService {
    store: Arc<dyn RideStore>,
    processor: Arc<dyn PaymentProcessor>,
    rider_service: Arc<RiderService>,
    notification_service: Arc<dyn NotificationService>,
    settings: PaymentSettings,
}

/// What a new payment charges, before it is written.
struct Charge {
    payment_type: PaymentType,
    base_fare: i64,
    tip_amount: i64,
    discount: i64,
    promo_code: Option<String>,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn RideStore>,
        processor: Arc<dyn PaymentProcessor>,
        rider_service: Arc<RiderService>,
        notification_service: Arc<dyn NotificationService>,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            store,
            processor,
            rider_service,
            notification_service,
            settings,
        }
    }

    async fn load(&self, payment_id: &str) -> Result<Payment, AppError> {
        if !IdGenerator::validate_id(payment_id, Some(IdType::Payment)) {
            return Err(AppError::PaymentNotFound(payment_id.to_string()));
        }
        self.store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::PaymentNotFound(payment_id.to_string()))
    }

    /// Compare-and-set write of one payment, validated before every attempt.
    /// `Ok(false)` from `change` skips the write.
    async fn write_payment<F>(&self, payment_id: &str, mut change: F) -> Result<(Payment, bool), AppError>
    where
        F: FnMut(&mut Payment) -> Result<bool, AppError> + Send,
    {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut payment = self.load(payment_id).await?;
            if !change(&mut payment)? {
                return Ok((payment, false));
            }
            payment.validate()?;
            let expected = payment.version;
            payment.version += 1;
            payment.updated_at = Utc::now();
            if self.store.replace_payment(&payment, expected).await? {
                return Ok((payment, true));
            }
            tracing::debug!("Payment {} changed underneath us, retrying", payment_id);
        }
        Err(AppError::conflict(format!("Payment {} is being updated concurrently", payment_id)))
    }

    /// Moves a payment to a closing state when the edge exists. Closing events that arrive
    /// late (a failure after `paid`, a second expiry) are dropped.
    async fn close_payment(
        &self,
        payment_id: &str,
        next: PaymentStatus,
        reason: Option<String>,
    ) -> Result<(Payment, bool), AppError> {
        let (payment, written) = self
            .write_payment(payment_id, |payment| {
                if !payment.status.can_transition_to(next) {
                    return Ok(false);
                }
                payment.transition(next, Utc::now())?;
                if reason.is_some() {
                    payment.failure_reason = reason.clone();
                }
                Ok(true)
            })
            .await?;

        if written {
            tracing::info!("Payment {} is now {}", payment.id, payment.status);
        } else {
            tracing::info!("Payment {} stays {}; ignoring move to {}", payment.id, payment.status, next);
        }
        Ok((payment, written))
    }

    /// A completed trip the caller may pay for.
    async fn payable_trip(&self, principal: &Principal, trip_id: &str) -> Result<Trip, AppError> {
        principal.require_role(&[Role::Rider, Role::Admin])?;
        let trip = self
            .store
            .get_trip(trip_id)
            .await?
            .ok_or_else(|| AppError::TripNotFound(trip_id.to_string()))?;
        principal.require_self(&trip.rider_id)?;
        if trip.status != TripStatus::Completed {
            return Err(AppError::conflict(format!(
                "Trip {} is {}; only completed trips can be paid",
                trip.id, trip.status
            )));
        }
        Ok(trip)
    }

    fn trip_charge(&self, trip: &Trip, tip_amount: i64, promo_code: Option<&str>) -> Result<Charge, AppError> {
        if tip_amount < 0 {
            return Err(AppError::validation_error("tip_amount", "Tip cannot be negative"));
        }
        let fare = trip.fare.total_fare;
        let (discount, promo_code) = match promo_code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => {
                let promo = self
                    .settings
                    .promo_codes
                    .lookup(code)
                    .ok_or_else(|| AppError::validation_error("promo_code", "Unknown promo code"))?;
                (promo.discount_for(fare), Some(promo.code.clone()))
            }
            None => (0, None),
        };
        Ok(Charge {
            payment_type: PaymentType::TripPayment,
            base_fare: fare,
            tip_amount,
            discount,
            promo_code,
        })
    }

    fn new_payment(&self, trip: &Trip, rider: &Rider, charge: Charge) -> Result<Payment, AppError> {
        let driver_id = trip
            .driver_id
            .clone()
            .ok_or_else(|| AppError::conflict(format!("Trip {} has no driver to pay", trip.id)))?;

        let amount = charge.base_fare + charge.tip_amount - charge.discount;
        let (platform_fee, driver_earnings) = match charge.payment_type {
            PaymentType::TripPayment => split_fees(amount, charge.tip_amount),
            PaymentType::Tip => (0, amount),
        };

        let now = Utc::now();
        let payment = Payment {
            id: String::new(),
            rider_id: rider.id.clone(),
            driver_id,
            trip_id: trip.id.clone(),
            payment_type: charge.payment_type,
            amount,
            base_fare: charge.base_fare,
            tip_amount: charge.tip_amount,
            discount: charge.discount,
            promo_code: charge.promo_code,
            platform_fee,
            driver_earnings,
            refunded_amount: 0,
            currency: trip.fare.currency.clone(),
            status: PaymentStatus::Created,
            checkout_session_id: None,
            checkout_url: None,
            payment_intent_id: None,
            stripe_customer_id: rider.stripe_customer_id.clone(),
            payment_method_id: None,
            failure_reason: None,
            expires_at: None,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
            expired_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
        .with_generated_id(IdType::Payment);

        payment.validate()?;
        Ok(payment)
    }

    /// Writes a new payment. Trip payments take the trip's slot; a live one already there
    /// is a duplicate.
    async fn reserve(&self, payment: &Payment) -> Result<(), AppError> {
        if self.store.insert_payment(payment).await? {
            return Ok(());
        }
        if let Some(existing) = self.store.payment_for_trip(&payment.trip_id).await? {
            tracing::warn!(
                "Trip {} already has payment {} ({})",
                payment.trip_id, existing.id, existing.status
            );
        }
        Err(AppError::DuplicatePayment(payment.trip_id.clone()))
    }

    /// Marks a payment failed after the processor refused to start it, so the trip is free again.
    async fn abandon(&self, payment_id: &str, error: &AppError) {
        let reason = Some(error.to_string());
        if let Err(e) = self.close_payment(payment_id, PaymentStatus::Failed, reason).await {
            tracing::error!("Failed to mark payment {} as failed: {}", payment_id, e);
        }
    }

    async fn ensure_customer(&self, rider: &Rider) -> Result<String, AppError> {
        if let Some(customer_id) = &rider.stripe_customer_id {
            return Ok(customer_id.clone());
        }
        let customer_id = self
            .processor
            .create_customer(&rider.id, &rider.email, &rider.name)
            .await?;
        self.rider_service.set_stripe_customer(&rider.id, &customer_id).await?;
        tracing::info!("Created processor customer {} for rider {}", customer_id, rider.id);
        Ok(customer_id)
    }

    async fn rider_for(&self, principal: &Principal) -> Result<Rider, AppError> {
        principal.require_role(&[Role::Rider])?;
        self.rider_service.get_rider(&principal.id).await
    }

    /// Starts an intent for a freshly reserved payment and applies the processor's answer.
    async fn run_intent(
        &self,
        payment: Payment,
        customer_id: String,
        payment_method_id: &str,
        description: String,
    ) -> Result<PaymentIntentResponse, AppError> {
        let params = PaymentIntentParams {
            payment_id: payment.id.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            description,
            customer_id: Some(customer_id),
            payment_method_id: payment_method_id.to_string(),
        };

        let intent = match self.processor.create_payment_intent(&params).await {
            Ok(intent) => intent,
            Err(e) => {
                self.abandon(&payment.id, &e).await;
                return Err(e);
            }
        };

        let intent_id = intent.id.clone();
        self.write_payment(&payment.id, |p| {
            p.payment_intent_id = Some(intent_id.clone());
            Ok(true)
        })
        .await?;

        let payment = self.apply_intent(&payment.id, &intent).await?;
        Ok(PaymentIntentResponse {
            payment,
            intent: IntentSummary {
                id: intent.id,
                status: intent.status,
                client_secret: intent.client_secret,
            },
        })
    }

    /// Folds an intent status reported by the processor into the payment.
    async fn apply_intent(&self, payment_id: &str, intent: &ProcessorIntent) -> Result<Payment, AppError> {
        if intent.is_succeeded() {
            let outcome = self
                .reconcile_completion(payment_id, ReconcileSource::IntentConfirmation)
                .await?;
            return Ok(outcome.payment);
        }
        if intent.is_failed() {
            let reason = Some(format!("Payment intent {}", intent.status));
            return Ok(self.close_payment(payment_id, PaymentStatus::Failed, reason).await?.0);
        }

        let next = if intent.status == "processing" {
            PaymentStatus::Processing
        } else {
            PaymentStatus::Pending
        };
        let (payment, _) = self
            .write_payment(payment_id, |p| {
                if p.status == next || !p.status.can_transition_to(next) {
                    return Ok(false);
                }
                p.transition(next, Utc::now())?;
                Ok(true)
            })
            .await?;
        Ok(payment)
    }

    /// Points the trip at its paid payment. Safe to repeat.
    async fn mark_trip_paid(&self, payment: &Payment) -> Result<(), AppError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut trip = self
                .store
                .get_trip(&payment.trip_id)
                .await?
                .ok_or_else(|| AppError::TripNotFound(payment.trip_id.clone()))?;
            if trip.payment_status == TripPaymentStatus::Paid && trip.payment_id.as_deref() == Some(payment.id.as_str()) {
                return Ok(());
            }
            let expected = trip.version;
            trip.payment_status = TripPaymentStatus::Paid;
            trip.payment_id = Some(payment.id.clone());
            trip.version += 1;
            trip.updated_at = Utc::now();
            if self.store.replace_trip(&trip, expected).await? {
                return Ok(());
            }
        }
        Err(AppError::conflict(format!("Trip {} is being updated concurrently", payment.trip_id)))
    }

    /// Brings the rider aggregate in line with their paid payments. Totals are recounted
    /// from the payments and only ever raised, so a racing or repeated call writes the
    /// same values or nothing.
    async fn apply_rider_stats(&self, payment: &Payment) -> Result<bool, AppError> {
        let paid: Vec<Payment> = self
            .store
            .payments_for_rider(&payment.rider_id)
            .await?
            .into_iter()
            .filter(|p| p.status == PaymentStatus::Paid)
            .collect();

        let paid_trips = paid.iter().filter(|p| p.is_trip_payment()).count();
        let paid_trips = u32::try_from(paid_trips).unwrap_or(u32::MAX);
        let paid_amount: i64 = paid.iter().map(|p| p.amount).sum();
        let paid_at = payment.completed_at.unwrap_or_else(Utc::now);

        let (rider, written) = self
            .rider_service
            .update_with(&payment.rider_id, |rider| {
                let stats = &mut rider.stats;
                if stats.total_trips >= paid_trips && stats.total_amount_spent >= paid_amount {
                    return Ok(false);
                }
                stats.total_trips = stats.total_trips.max(paid_trips);
                stats.total_amount_spent = stats.total_amount_spent.max(paid_amount);
                stats.last_payment_date = Some(stats.last_payment_date.map_or(paid_at, |d| d.max(paid_at)));
                Ok(true)
            })
            .await?;

        if written {
            tracing::info!(
                "Rider {} stats updated for payment {}: {} trips, {} spent",
                rider.id, payment.id, rider.stats.total_trips, rider.stats.total_amount_spent
            );
        } else {
            tracing::debug!("Rider {} already accounts for payment {}", payment.rider_id, payment.id);
        }
        Ok(written)
    }

    fn require_payment_party(principal: &Principal, payment: &Payment) -> Result<(), AppError> {
        let allowed = match principal.role {
            Role::Admin => true,
            Role::Rider => payment.rider_id == principal.id,
            Role::Driver => payment.driver_id == principal.id,
        };
        if allowed {
            Ok(())
        } else {
            Err(AppError::forbidden("You are not a party to this payment"))
        }
    }

    async fn dispatch_event(&self, event: &ProcessorEvent) -> Result<(), AppError> {
        match event.event_type.as_str() {
            "checkout.session.completed" => {
                let Some(payment_id) = event
                    .metadata("paymentId")
                    .or_else(|| event.object_str("client_reference_id"))
                else {
                    tracing::warn!("Checkout completion {} carries no payment id", event.id);
                    return Ok(());
                };
                if let Some(intent_id) = event.object_str("payment_intent") {
                    self.write_payment(payment_id, |p| {
                        if p.payment_intent_id.is_some() {
                            return Ok(false);
                        }
                        p.payment_intent_id = Some(intent_id.to_string());
                        Ok(true)
                    })
                    .await?;
                }
                self.reconcile_completion(payment_id, ReconcileSource::Webhook).await?;
            }
            "payment_intent.succeeded" => {
                if let Some(payment) = self.payment_for_intent_event(event).await? {
                    self.reconcile_completion(&payment.id, ReconcileSource::Webhook).await?;
                }
            }
            "payment_intent.payment_failed" => {
                if let Some(payment) = self.payment_for_intent_event(event).await? {
                    let reason = event
                        .data
                        .object
                        .pointer("/last_payment_error/message")
                        .and_then(|v| v.as_str())
                        .unwrap_or("Payment failed")
                        .to_string();
                    self.close_payment(&payment.id, PaymentStatus::Failed, Some(reason)).await?;
                }
            }
            "checkout.session.expired" => {
                match event
                    .metadata("paymentId")
                    .or_else(|| event.object_str("client_reference_id"))
                {
                    Some(payment_id) => {
                        self.close_payment(payment_id, PaymentStatus::Expired, None).await?;
                    }
                    None => tracing::warn!("Checkout expiry {} carries no payment id", event.id),
                }
            }
            other => {
                tracing::info!("Ignoring unhandled processor event {} ({})", event.id, other);
            }
        }
        Ok(())
    }

    async fn payment_for_intent_event(&self, event: &ProcessorEvent) -> Result<Option<Payment>, AppError> {
        if let Some(intent_id) = event.object_str("id") {
            if let Some(payment) = self.store.payment_by_intent(intent_id).await? {
                return Ok(Some(payment));
            }
        }
        // The intent id may not be stored yet when the event outruns our own write.
        if let Some(payment_id) = event.metadata("paymentId") {
            return self.load(payment_id).await.map(Some);
        }
        tracing::warn!("No payment found for intent event {}", event.id);
        Ok(None)
    }
}

#[async_trait]
impl PaymentOperations for PaymentService {
    async fn open_checkout(&self, principal: &Principal, request: CheckoutRequest) -> Result<CheckoutSession, AppError> {
        tracing::info!("Opening checkout for trip {}", request.trip_id);
        let trip = self.payable_trip(principal, &request.trip_id).await?;
        let rider = self.rider_service.get_rider(&trip.rider_id).await?;

        let charge = self.trip_charge(&trip, request.tip_amount, request.promo_code.as_deref())?;
        let mut payment = self.new_payment(&trip, &rider, charge)?;
        let expires_at = Utc::now() + self.settings.checkout_ttl;
        payment.expires_at = Some(expires_at);
        self.reserve(&payment).await?;

        let session_request = CheckoutSessionRequest {
            payment_id: payment.id.clone(),
            trip_id: trip.id.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            description: format!(
                "Trip from {} to {}",
                trip.pickup_location.address, trip.dropoff_location.address
            ),
            customer_id: rider.stripe_customer_id.clone(),
            success_url: format!("{}/payment/success?payment_id={}", self.settings.frontend_url, payment.id),
            cancel_url: format!("{}/payment/cancel?payment_id={}", self.settings.frontend_url, payment.id),
            expires_at,
        };

        let session = match self.processor.create_checkout_session(&session_request).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("Checkout session for payment {} failed: {}", payment.id, e);
                self.abandon(&payment.id, &e).await;
                return Err(e);
            }
        };

        let (payment, _) = self
            .write_payment(&payment.id, |p| {
                p.checkout_session_id = Some(session.id.clone());
                p.checkout_url = Some(session.url.clone());
                if let Some(at) = session.expires_at {
                    p.expires_at = Some(at);
                }
                if p.status == PaymentStatus::Created {
                    p.transition(PaymentStatus::Pending, Utc::now())?;
                }
                Ok(true)
            })
            .await?;

        tracing::info!("Checkout {} opened for payment {} ({} {})", session.id, payment.id, payment.amount, payment.currency);
        Ok(CheckoutSession {
            payment_id: payment.id,
            session_id: session.id,
            url: session.url,
            amount: payment.amount,
            currency: payment.currency,
            expires_at: payment.expires_at,
        })
    }

    async fn open_payment_intent(&self, principal: &Principal, request: PaymentIntentRequest) -> Result<PaymentIntentResponse, AppError> {
        tracing::info!("Opening payment intent for trip {}", request.trip_id);
        let trip = self.payable_trip(principal, &request.trip_id).await?;
        let rider = self.rider_service.get_rider(&trip.rider_id).await?;

        let charge = self.trip_charge(&trip, request.tip_amount, request.promo_code.as_deref())?;
        let mut payment = self.new_payment(&trip, &rider, charge)?;
        payment.payment_method_id = Some(request.payment_method_id.clone());
        self.reserve(&payment).await?;

        let customer_id = match self.ensure_customer(&rider).await {
            Ok(id) => id,
            Err(e) => {
                self.abandon(&payment.id, &e).await;
                return Err(e);
            }
        };
        let description = format!("Trip payment for {}", trip.id);
        self.run_intent(payment, customer_id, &request.payment_method_id, description).await
    }

    async fn confirm_payment_intent(&self, principal: &Principal, intent_id: &str) -> Result<PaymentIntentResponse, AppError> {
        let payment = self
            .store
            .payment_by_intent(intent_id)
            .await?
            .ok_or_else(|| AppError::PaymentNotFound(intent_id.to_string()))?;
        principal.require_self(&payment.rider_id)?;

        let intent = if payment.status.is_settled() {
            self.processor.retrieve_payment_intent(intent_id).await?
        } else {
            self.processor.confirm_payment_intent(intent_id).await?
        };
        tracing::info!("Intent {} for payment {} is {}", intent.id, payment.id, intent.status);

        let payment = self.apply_intent(&payment.id, &intent).await?;
        Ok(PaymentIntentResponse {
            payment,
            intent: IntentSummary {
                id: intent.id,
                status: intent.status,
                client_secret: intent.client_secret,
            },
        })
    }

    async fn process_tip(&self, principal: &Principal, request: TipRequest) -> Result<PaymentIntentResponse, AppError> {
        if request.tip_amount < 1 {
            return Err(AppError::validation_error("tip_amount", "Tip must be at least 1"));
        }
        tracing::info!("Processing tip of {} for trip {}", request.tip_amount, request.trip_id);

        let trip = self.payable_trip(principal, &request.trip_id).await?;
        let rider = self.rider_service.get_rider(&trip.rider_id).await?;
        let charge = Charge {
            payment_type: PaymentType::Tip,
            base_fare: 0,
            tip_amount: request.tip_amount,
            discount: 0,
            promo_code: None,
        };
        let mut payment = self.new_payment(&trip, &rider, charge)?;
        payment.payment_method_id = Some(request.payment_method_id.clone());

        let customer_id = self.ensure_customer(&rider).await?;
        payment.stripe_customer_id = Some(customer_id.clone());
        self.reserve(&payment).await?;

        let description = format!("Tip for trip {}", trip.id);
        self.run_intent(payment, customer_id, &request.payment_method_id, description).await
    }

    async fn reconcile_completion(&self, payment_id: &str, source: ReconcileSource) -> Result<ReconcileOutcome, AppError> {
        tracing::info!("Reconciling payment {} from {}", payment_id, source);

        let (payment, transitioned) = self
            .write_payment(payment_id, |payment| {
                if payment.status == PaymentStatus::Paid {
                    return Ok(false);
                }
                payment.transition(PaymentStatus::Paid, Utc::now())?;
                Ok(true)
            })
            .await
            .inspect_err(|e| tracing::error!("Payment {} cannot be reconciled: {}", payment_id, e))?;

        if payment.is_trip_payment() {
            self.mark_trip_paid(&payment).await?;
        }
        let rider_stats_updated = self.apply_rider_stats(&payment).await?;

        if transitioned {
            tracing::info!("Payment {} marked paid via {}", payment.id, source);
            if let Err(e) = self.notification_service.notify_payment_received(&payment).await {
                tracing::warn!("Failed to notify driver of payment {}: {}", payment.id, e);
            }
        }

        Ok(ReconcileOutcome {
            payment,
            transitioned,
            rider_stats_updated,
        })
    }

    async fn confirm_checkout_success(&self, principal: &Principal, payment_id: &str) -> Result<ReconcileOutcome, AppError> {
        let payment = self.load(payment_id).await?;
        principal.require_self(&payment.rider_id)?;
        self.reconcile_completion(payment_id, ReconcileSource::Redirect).await
    }

    async fn cancel_checkout(&self, principal: &Principal, payment_id: &str) -> Result<Payment, AppError> {
        let current = self.load(payment_id).await?;
        principal.require_self(&current.rider_id)?;

        let (payment, written) = self
            .write_payment(payment_id, |payment| {
                if payment.status == PaymentStatus::Cancelled {
                    return Ok(false);
                }
                if !payment.status.is_open() {
                    return Err(AppError::invalid_transition(payment.status, PaymentStatus::Cancelled));
                }
                payment.transition(PaymentStatus::Cancelled, Utc::now())?;
                Ok(true)
            })
            .await?;

        if written {
            tracing::info!("Payment {} cancelled by rider", payment.id);
        }
        Ok(payment)
    }

    async fn handle_processor_event(&self, payload: &[u8], signature_header: Option<&str>) -> Result<WebhookAck, AppError> {
        let secret = self
            .settings
            .webhook_secret
            .as_deref()
            .ok_or_else(|| AppError::InvalidSignature("webhook secret is not configured".to_string()))?;
        signature::verify(
            secret,
            signature_header,
            payload,
            Utc::now().timestamp(),
            self.settings.webhook_tolerance_secs,
        )
        .map_err(|e| {
            tracing::warn!("Rejected webhook: {}", e);
            AppError::InvalidSignature(e.to_string())
        })?;

        let event: ProcessorEvent = serde_json::from_slice(payload)
            .map_err(|e| AppError::bad_request(format!("Malformed event payload: {}", e)))?;
        tracing::info!("Processor event {} ({})", event.id, event.event_type);

        if self.store.has_processor_event(&event.id).await? {
            tracing::info!("Event {} already processed, acknowledging", event.id);
            return Ok(WebhookAck {
                received: true,
                event_id: event.id,
                duplicate: true,
            });
        }

        self.dispatch_event(&event).await?;
        self.store.record_processor_event(&event.id).await?;

        Ok(WebhookAck {
            received: true,
            event_id: event.id,
            duplicate: false,
        })
    }

    async fn expire_stale_checkouts(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let stale: Vec<Payment> = self
            .store
            .open_payments()
            .await?
            .into_iter()
            .filter(|p| p.expires_at.is_some_and(|at| at <= now))
            .collect();

        let mut expired = 0;
        for payment in stale {
            match self.close_payment(&payment.id, PaymentStatus::Expired, None).await {
                Ok((_, true)) => expired += 1,
                Ok((_, false)) => {}
                Err(e) => tracing::error!("Failed to expire payment {}: {}", payment.id, e),
            }
        }
        if expired > 0 {
            tracing::info!("Expired {} stale checkouts", expired);
        }
        Ok(expired)
    }

    async fn payment_history(&self, principal: &Principal) -> Result<Vec<Payment>, AppError> {
        let mut payments = match principal.role {
            Role::Rider => self.store.payments_for_rider(&principal.id).await?,
            Role::Driver => self.store.payments_for_driver(&principal.id).await?,
            Role::Admin => return Err(AppError::forbidden("Payment history is per rider or driver")),
        };
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn payment_details(&self, principal: &Principal, payment_id: &str) -> Result<Payment, AppError> {
        let payment = self.load(payment_id).await?;
        Self::require_payment_party(principal, &payment)?;
        Ok(payment)
    }

    async fn driver_earnings(&self, principal: &Principal, driver_id: &str) -> Result<DriverEarnings, AppError> {
        principal.require_self(driver_id)?;
        let paid: Vec<Payment> = self
            .store
            .payments_for_driver(driver_id)
            .await?
            .into_iter()
            .filter(|p| p.status == PaymentStatus::Paid)
            .collect();

        let total_earnings: i64 = paid.iter().map(|p| p.driver_earnings).sum();
        let total_trips = paid.iter().filter(|p| p.is_trip_payment()).count() as u32;
        let total_tips: i64 = paid.iter().map(|p| p.tip_amount).sum();
        let average_earnings_per_trip = if total_trips > 0 {
            round2(total_earnings as f64 / total_trips as f64)
        } else {
            0.0
        };

        Ok(DriverEarnings {
            driver_id: driver_id.to_string(),
            total_earnings,
            total_trips,
            total_tips,
            average_earnings_per_trip,
        })
    }

    async fn list_payment_methods(&self, principal: &Principal) -> Result<Vec<PaymentMethodSummary>, AppError> {
        let rider = self.rider_for(principal).await?;
        match &rider.stripe_customer_id {
            Some(customer_id) => self.processor.list_payment_methods(customer_id).await,
            None => Ok(Vec::new()),
        }
    }

    async fn add_payment_method(&self, principal: &Principal, payment_method_id: &str) -> Result<PaymentMethodSummary, AppError> {
        if payment_method_id.trim().is_empty() {
            return Err(AppError::MissingRequiredField("payment_method_id".to_string()));
        }
        let rider = self.rider_for(principal).await?;
        let customer_id = self.ensure_customer(&rider).await?;
        let method = self.processor.attach_payment_method(&customer_id, payment_method_id).await?;
        tracing::info!("Payment method {} attached for rider {}", method.id, rider.id);
        Ok(method)
    }

    async fn remove_payment_method(&self, principal: &Principal, payment_method_id: &str) -> Result<(), AppError> {
        let rider = self.rider_for(principal).await?;
        let not_found = || AppError::NotFound(format!("Payment method {}", payment_method_id));
        let customer_id = rider.stripe_customer_id.as_deref().ok_or_else(not_found)?;

        let methods = self.processor.list_payment_methods(customer_id).await?;
        if !methods.iter().any(|m| m.id == payment_method_id) {
            return Err(not_found());
        }
        self.processor.detach_payment_method(payment_method_id).await?;
        tracing::info!("Payment method {} removed for rider {}", payment_method_id, rider.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::processor_service::MockPaymentProcessor;
    use crate::test_support::{Harness, TEST_WEBHOOK_SECRET};
    use serde_json::json;

    fn checkout(trip_id: &str) -> CheckoutRequest {
        CheckoutRequest {
            trip_id: trip_id.to_string(),
            tip_amount: 0,
            promo_code: None,
        }
    }

    fn signed(body: &serde_json::Value) -> (Vec<u8>, String) {
        let payload = serde_json::to_vec(body).unwrap();
        let header = signature::signature_header(TEST_WEBHOOK_SECRET, Utc::now().timestamp(), &payload).unwrap();
        (payload, header)
    }

    fn completed_event(event_id: &str, payment_id: &str) -> serde_json::Value {
        json!({
            "id": event_id,
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_1",
                "payment_intent": "pi_test_1",
                "metadata": { "paymentId": payment_id }
            }}
        })
    }

    #[tokio::test]
    async fn test_checkout_amounts_and_pending_state() {
        let h = Harness::new();
        let (trip, rider) = h.completed_trip(146).await;

        let session = h.state.payment_service.open_checkout(&rider, checkout(&trip.id)).await.unwrap();
        assert_eq!(session.amount, 146);
        assert!(session.url.contains(&session.session_id));

        let payment = h.state.payment_service.payment_details(&rider, &session.payment_id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.platform_fee, 29);
        assert_eq!(payment.driver_earnings, 117);
        assert_eq!(payment.platform_fee + payment.driver_earnings, payment.amount);
        let lifetime = payment.expires_at.unwrap() - payment.created_at;
        assert!(lifetime > Duration::minutes(30), "checkout lifetime {}", lifetime);
    }

    #[tokio::test]
    async fn test_tip_and_promo_shape_the_amount() {
        let h = Harness::new();
        let (trip, rider) = h.completed_trip(146).await;

        let request = CheckoutRequest {
            trip_id: trip.id.clone(),
            tip_amount: 20,
            promo_code: Some("ride10".to_string()),
        };
        let session = h.state.payment_service.open_checkout(&rider, request).await.unwrap();
        let payment = h.state.payment_service.payment_details(&rider, &session.payment_id).await.unwrap();

        assert_eq!(payment.discount, 15);
        assert_eq!(payment.amount, 146 + 20 - 15);
        assert_eq!(payment.promo_code.as_deref(), Some("RIDE10"));
        assert_eq!(payment.platform_fee + payment.driver_earnings, payment.amount);
        assert!(payment.driver_earnings >= payment.tip_amount);
    }

    #[tokio::test]
    async fn test_unknown_promo_is_rejected() {
        let h = Harness::new();
        let (trip, rider) = h.completed_trip(146).await;
        let request = CheckoutRequest {
            trip_id: trip.id.clone(),
            tip_amount: 0,
            promo_code: Some("NOPE".to_string()),
        };
        let err = h.state.payment_service.open_checkout(&rider, request).await.unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[tokio::test]
    async fn test_checkout_preconditions() {
        let h = Harness::new();
        let (trip, rider) = h.completed_trip(146).await;

        let stranger = Principal::new("rdr-251019-stranger", Role::Rider);
        let err = h.state.payment_service.open_checkout(&stranger, checkout(&trip.id)).await.unwrap_err();
        assert_eq!(err.kind(), "forbidden");

        let err = h
            .state
            .payment_service
            .open_checkout(&rider, checkout("trp-251019-missing0"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TripNotFound(_)));

        h.state.payment_service.open_checkout(&rider, checkout(&trip.id)).await.unwrap();
        let err = h.state.payment_service.open_checkout(&rider, checkout(&trip.id)).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicatePayment(_)));
    }

    #[tokio::test]
    async fn test_open_trip_cannot_be_paid() {
        let h = Harness::new();
        let (trip, rider) = h.requested_trip().await;
        let err = h.state.payment_service.open_checkout(&rider, checkout(&trip.id)).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn test_processor_failure_frees_the_trip() {
        let h = Harness::new();
        let (trip, rider) = h.completed_trip(146).await;

        h.processor.set_failing(true);
        let err = h.state.payment_service.open_checkout(&rider, checkout(&trip.id)).await.unwrap_err();
        assert_eq!(err.kind(), "upstream_error");

        h.processor.set_failing(false);
        assert!(h.state.payment_service.open_checkout(&rider, checkout(&trip.id)).await.is_ok());
    }

    #[tokio::test]
    async fn test_reconcile_twice_counts_once() {
        let h = Harness::new();
        let (trip, rider) = h.completed_trip(146).await;
        let session = h.state.payment_service.open_checkout(&rider, checkout(&trip.id)).await.unwrap();
        let payments = &h.state.payment_service;

        let first = payments.reconcile_completion(&session.payment_id, ReconcileSource::Redirect).await.unwrap();
        assert!(first.transitioned);
        assert!(first.rider_stats_updated);

        let second = payments.reconcile_completion(&session.payment_id, ReconcileSource::Webhook).await.unwrap();
        assert!(!second.transitioned);
        assert!(!second.rider_stats_updated);
        assert_eq!(second.payment.completed_at, first.payment.completed_at);

        let stored = h.state.rider_service.get_rider(&rider.id).await.unwrap();
        assert_eq!(stored.stats.total_trips, 1);
        assert_eq!(stored.stats.total_amount_spent, 146);
        assert!(stored.stats.last_payment_date.is_some());

        let trip = h.store.get_trip(&trip.id).await.unwrap().unwrap();
        assert_eq!(trip.payment_status, TripPaymentStatus::Paid);
        assert_eq!(trip.payment_id.as_deref(), Some(session.payment_id.as_str()));
    }

    #[tokio::test]
    async fn test_concurrent_reconciles_count_once() {
        let h = Harness::new();
        let (trip, rider) = h.completed_trip(146).await;
        let session = h.state.payment_service.open_checkout(&rider, checkout(&trip.id)).await.unwrap();
        let payments = h.state.payment_service.clone();

        let (a, b) = tokio::join!(
            payments.reconcile_completion(&session.payment_id, ReconcileSource::Redirect),
            payments.reconcile_completion(&session.payment_id, ReconcileSource::Webhook),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a.transitioned ^ b.transitioned);

        let stored = h.state.rider_service.get_rider(&rider.id).await.unwrap();
        assert_eq!(stored.stats.total_trips, 1);
        assert_eq!(stored.stats.total_amount_spent, 146);
    }

    #[tokio::test]
    async fn test_out_of_order_trips_both_count() {
        let h = Harness::new();
        let payments = &h.state.payment_service;

        let (first_trip, rider) = h.completed_trip(146).await;
        let first = payments.open_checkout(&rider, checkout(&first_trip.id)).await.unwrap();
        let second_trip = h.completed_trip_for(&rider, 200).await;
        let second = payments.open_checkout(&rider, checkout(&second_trip.id)).await.unwrap();

        payments.reconcile_completion(&second.payment_id, ReconcileSource::Webhook).await.unwrap();
        payments.reconcile_completion(&first.payment_id, ReconcileSource::Webhook).await.unwrap();
        let repeat = payments.reconcile_completion(&first.payment_id, ReconcileSource::Redirect).await.unwrap();
        assert!(!repeat.rider_stats_updated);

        let stored = h.state.rider_service.get_rider(&rider.id).await.unwrap();
        assert_eq!(stored.stats.total_trips, 2);
        assert_eq!(stored.stats.total_amount_spent, 346);
    }

    #[tokio::test]
    async fn test_cancel_only_from_open_states() {
        let h = Harness::new();
        let (trip, rider) = h.completed_trip(146).await;
        let payments = &h.state.payment_service;

        let session = payments.open_checkout(&rider, checkout(&trip.id)).await.unwrap();
        let cancelled = payments.cancel_checkout(&rider, &session.payment_id).await.unwrap();
        assert_eq!(cancelled.status, PaymentStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());
        let again = payments.cancel_checkout(&rider, &session.payment_id).await.unwrap();
        assert_eq!(again.version, cancelled.version);

        // Cancelling released the trip.
        let retry = payments.open_checkout(&rider, checkout(&trip.id)).await.unwrap();
        payments.reconcile_completion(&retry.payment_id, ReconcileSource::Redirect).await.unwrap();
        let err = payments.cancel_checkout(&rider, &retry.payment_id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_reconcile_refuses_abandoned_payment() {
        let h = Harness::new();
        let (trip, rider) = h.completed_trip(146).await;
        let payments = &h.state.payment_service;

        let session = payments.open_checkout(&rider, checkout(&trip.id)).await.unwrap();
        payments.cancel_checkout(&rider, &session.payment_id).await.unwrap();
        let err = payments
            .reconcile_completion(&session.payment_id, ReconcileSource::Webhook)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));

        let stored = h.state.rider_service.get_rider(&rider.id).await.unwrap();
        assert_eq!(stored.stats.total_trips, 0);
    }

    #[tokio::test]
    async fn test_webhook_completes_and_dedupes() {
        let h = Harness::new();
        let (trip, rider) = h.completed_trip(146).await;
        let payments = &h.state.payment_service;
        let session = payments.open_checkout(&rider, checkout(&trip.id)).await.unwrap();

        let (payload, header) = signed(&completed_event("evt_1", &session.payment_id));
        let ack = payments.handle_processor_event(&payload, Some(&header)).await.unwrap();
        assert!(!ack.duplicate);

        let payment = payments.payment_details(&rider, &session.payment_id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Paid);
        assert_eq!(payment.payment_intent_id.as_deref(), Some("pi_test_1"));

        let ack = payments.handle_processor_event(&payload, Some(&header)).await.unwrap();
        assert!(ack.duplicate);

        let stored = h.state.rider_service.get_rider(&rider.id).await.unwrap();
        assert_eq!(stored.stats.total_trips, 1);
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_signature() {
        let h = Harness::new();
        let body = completed_event("evt_2", "pay-251019-a1b2c3d4");
        let payload = serde_json::to_vec(&body).unwrap();

        let err = h.state.payment_service.handle_processor_event(&payload, None).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_signature");

        let forged = signature::signature_header("whsec_other", Utc::now().timestamp(), &payload).unwrap();
        let err = h
            .state
            .payment_service
            .handle_processor_event(&payload, Some(&forged))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_signature");
    }

    #[tokio::test]
    async fn test_failure_and_expiry_never_overwrite_paid() {
        let h = Harness::new();
        let (trip, rider) = h.completed_trip(146).await;
        let payments = &h.state.payment_service;
        let session = payments.open_checkout(&rider, checkout(&trip.id)).await.unwrap();
        payments.reconcile_completion(&session.payment_id, ReconcileSource::Redirect).await.unwrap();

        let failed = json!({
            "id": "evt_fail",
            "type": "payment_intent.payment_failed",
            "data": { "object": {
                "id": "pi_unknown",
                "metadata": { "paymentId": session.payment_id },
                "last_payment_error": { "message": "card declined" }
            }}
        });
        let (payload, header) = signed(&failed);
        payments.handle_processor_event(&payload, Some(&header)).await.unwrap();

        let expired = json!({
            "id": "evt_exp",
            "type": "checkout.session.expired",
            "data": { "object": { "metadata": { "paymentId": session.payment_id } } }
        });
        let (payload, header) = signed(&expired);
        payments.handle_processor_event(&payload, Some(&header)).await.unwrap();

        let payment = payments.payment_details(&rider, &session.payment_id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Paid);
        assert_eq!(payment.failure_reason, None);
    }

    #[tokio::test]
    async fn test_failed_intent_event_records_reason() {
        let h = Harness::new();
        let (trip, rider) = h.completed_trip(146).await;
        let payments = &h.state.payment_service;
        let session = payments.open_checkout(&rider, checkout(&trip.id)).await.unwrap();

        let failed = json!({
            "id": "evt_fail_2",
            "type": "payment_intent.payment_failed",
            "data": { "object": {
                "id": "pi_x",
                "metadata": { "paymentId": session.payment_id },
                "last_payment_error": { "message": "card declined" }
            }}
        });
        let (payload, header) = signed(&failed);
        payments.handle_processor_event(&payload, Some(&header)).await.unwrap();

        let payment = payments.payment_details(&rider, &session.payment_id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(payment.failure_reason.as_deref(), Some("card declined"));
    }

    #[tokio::test]
    async fn test_unknown_events_are_acknowledged() {
        let h = Harness::new();
        let body = json!({ "id": "evt_misc", "type": "customer.created", "data": { "object": {} } });
        let (payload, header) = signed(&body);
        let ack = h.state.payment_service.handle_processor_event(&payload, Some(&header)).await.unwrap();
        assert!(ack.received);
    }

    #[tokio::test]
    async fn test_sweep_expires_only_stale_open_checkouts() {
        let h = Harness::new();
        let payments = &h.state.payment_service;

        let (stale_trip, rider) = h.completed_trip(146).await;
        let stale = payments.open_checkout(&rider, checkout(&stale_trip.id)).await.unwrap();
        let paid_trip = h.completed_trip_for(&rider, 120).await;
        let paid = payments.open_checkout(&rider, checkout(&paid_trip.id)).await.unwrap();
        payments.reconcile_completion(&paid.payment_id, ReconcileSource::Webhook).await.unwrap();

        assert_eq!(payments.expire_stale_checkouts(Utc::now()).await.unwrap(), 0);

        let later = Utc::now() + Duration::hours(2);
        assert_eq!(payments.expire_stale_checkouts(later).await.unwrap(), 1);

        let expired = payments.payment_details(&rider, &stale.payment_id).await.unwrap();
        assert_eq!(expired.status, PaymentStatus::Expired);
        assert!(expired.expired_at.is_some());
        let kept = payments.payment_details(&rider, &paid.payment_id).await.unwrap();
        assert_eq!(kept.status, PaymentStatus::Paid);

        // Expiry released the trip for a fresh checkout.
        assert!(payments.open_checkout(&rider, checkout(&stale_trip.id)).await.is_ok());
    }

    #[tokio::test]
    async fn test_intent_flow_and_tip() {
        let h = Harness::new();
        let (trip, rider) = h.completed_trip(146).await;
        let payments = &h.state.payment_service;

        let response = payments
            .open_payment_intent(&rider, PaymentIntentRequest {
                trip_id: trip.id.clone(),
                tip_amount: 0,
                promo_code: None,
                payment_method_id: "pm_card_visa".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(response.payment.status, PaymentStatus::Paid);
        assert!(response.intent.client_secret.is_some());

        let tip = payments
            .process_tip(&rider, TipRequest {
                trip_id: trip.id.clone(),
                tip_amount: 50,
                payment_method_id: "pm_card_visa".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(tip.payment.payment_type, PaymentType::Tip);
        assert_eq!(tip.payment.platform_fee, 0);
        assert_eq!(tip.payment.driver_earnings, 50);
        assert_eq!(tip.payment.status, PaymentStatus::Paid);

        let stored = h.state.rider_service.get_rider(&rider.id).await.unwrap();
        assert_eq!(stored.stats.total_trips, 1);
        assert_eq!(stored.stats.total_amount_spent, 196);
        assert!(stored.stripe_customer_id.is_some());

        let driver = Principal::new(&tip.payment.driver_id, Role::Driver);
        let earnings = payments.driver_earnings(&driver, &tip.payment.driver_id).await.unwrap();
        assert_eq!(earnings.total_trips, 1);
        assert_eq!(earnings.total_tips, 50);
        assert_eq!(earnings.total_earnings, 117 + 50);
        assert_eq!(earnings.average_earnings_per_trip, 167.0);

        let history = payments.payment_history(&driver).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_pending_intent_confirms_later() {
        let processor = Arc::new(MockPaymentProcessor::new());
        processor.set_intent_status("requires_confirmation");
        let h = Harness::with_processor(processor.clone());
        let (trip, rider) = h.completed_trip(146).await;
        let payments = &h.state.payment_service;

        let opened = payments
            .open_payment_intent(&rider, PaymentIntentRequest {
                trip_id: trip.id.clone(),
                tip_amount: 0,
                promo_code: None,
                payment_method_id: "pm_card_visa".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(opened.payment.status, PaymentStatus::Pending);

        processor.set_intent_status("succeeded");
        let confirmed = payments.confirm_payment_intent(&rider, &opened.intent.id).await.unwrap();
        assert_eq!(confirmed.payment.status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_payment_visibility() {
        let h = Harness::new();
        let (trip, rider) = h.completed_trip(146).await;
        let session = h.state.payment_service.open_checkout(&rider, checkout(&trip.id)).await.unwrap();

        let driver = Principal::new(trip.driver_id.as_deref().unwrap(), Role::Driver);
        assert!(h.state.payment_service.payment_details(&driver, &session.payment_id).await.is_ok());

        let other_driver = Principal::new("drv-251019-other000", Role::Driver);
        let err = h
            .state
            .payment_service
            .payment_details(&other_driver, &session.payment_id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "forbidden");
    }

    #[tokio::test]
    async fn test_payment_methods_create_customer_once() {
        let h = Harness::new();
        let (_, rider) = h.completed_trip(146).await;
        let payments = &h.state.payment_service;

        assert!(payments.list_payment_methods(&rider).await.unwrap().is_empty());
        payments.add_payment_method(&rider, "pm_1").await.unwrap();
        let customer = h.state.rider_service.get_rider(&rider.id).await.unwrap().stripe_customer_id;
        payments.add_payment_method(&rider, "pm_2").await.unwrap();
        let again = h.state.rider_service.get_rider(&rider.id).await.unwrap().stripe_customer_id;
        assert_eq!(customer, again);

        assert_eq!(payments.list_payment_methods(&rider).await.unwrap().len(), 2);
        payments.remove_payment_method(&rider, "pm_1").await.unwrap();
        assert_eq!(payments.list_payment_methods(&rider).await.unwrap().len(), 1);

        let err = payments.remove_payment_method(&rider, "pm_1").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
