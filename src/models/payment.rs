// src/models/payment.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{SparrowError, SparrowResult};

pub const PLATFORM_FEE_RATE: f64 = 0.20;
/// Allowed drift, in minor units, between the stored amount and its components.
pub const AMOUNT_TOLERANCE: i64 = 1;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Created,
    Pending,
    Processing,
    Paid,
    Failed,
    Cancelled,
    Expired,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 9] = [
        PaymentStatus::Created,
        PaymentStatus::Pending,
        PaymentStatus::Processing,
        PaymentStatus::Paid,
        PaymentStatus::Failed,
        PaymentStatus::Cancelled,
        PaymentStatus::Expired,
        PaymentStatus::Refunded,
        PaymentStatus::PartiallyRefunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Created => "created",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Created, Pending)
                | (Created | Pending, Processing)
                | (Created | Pending | Processing, Paid)
                | (Created | Pending | Processing, Failed)
                | (Created | Pending, Cancelled)
                | (Created | Pending, Expired)
                | (Paid, Refunded)
                | (Paid, PartiallyRefunded)
                | (PartiallyRefunded, Refunded)
        )
    }

    /// Still waiting on the rider or the processor.
    pub fn is_open(&self) -> bool {
        matches!(self, PaymentStatus::Created | PaymentStatus::Pending)
    }

    /// Abandoned outcomes give the trip back so a new checkout can start.
    pub fn releases_trip_slot(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Expired
        )
    }

    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Paid | PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    #[default]
    TripPayment,
    Tip,
}

/// Which signal reported the completion being reconciled.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileSource {
    Redirect,
    Webhook,
    IntentConfirmation,
}

impl fmt::Display for ReconcileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReconcileSource::Redirect => "redirect",
            ReconcileSource::Webhook => "webhook",
            ReconcileSource::IntentConfirmation => "intent_confirmation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Payment {
    pub id: String,
    pub rider_id: String,
    pub driver_id: String,
    pub trip_id: String,
    #[serde(default)]
    pub payment_type: PaymentType,
    pub amount: i64,
    pub base_fare: i64,
    pub tip_amount: i64,
    pub discount: i64,
    pub promo_code: Option<String>,
    pub platform_fee: i64,
    pub driver_earnings: i64,
    pub refunded_amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub checkout_session_id: Option<String>,
    pub checkout_url: Option<String>,
    pub payment_intent_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub failure_reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn validate(&self) -> SparrowResult<()> {
        if self.amount < 1 {
            return Err(SparrowError::validation_error("amount", "Amount must be at least 1"));
        }
        if self.tip_amount < 0 || self.discount < 0 || self.base_fare < 0 {
            return Err(SparrowError::validation_error(
                "amount",
                "Fare components cannot be negative",
            ));
        }

        let calculated = self.base_fare + self.tip_amount - self.discount;
        if (calculated - self.amount).abs() > AMOUNT_TOLERANCE {
            return Err(SparrowError::AmountMismatch {
                amount: self.amount,
                calculated,
            });
        }
        if self.refunded_amount < 0 || self.refunded_amount > self.amount {
            return Err(SparrowError::validation_error(
                "refunded_amount",
                "Refunded amount cannot exceed the payment amount",
            ));
        }
        if self.driver_earnings > self.base_fare + self.tip_amount {
            return Err(SparrowError::validation_error(
                "driver_earnings",
                "Driver earnings cannot exceed fare plus tip",
            ));
        }
        Ok(())
    }

    /// Moves to `next`, stamping the matching timestamp, or reports the illegal edge.
    pub fn transition(&mut self, next: PaymentStatus, at: DateTime<Utc>) -> SparrowResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(SparrowError::invalid_transition(self.status, next));
        }
        match next {
            PaymentStatus::Paid => self.completed_at = Some(at),
            PaymentStatus::Failed => self.failed_at = Some(at),
            PaymentStatus::Cancelled => self.cancelled_at = Some(at),
            PaymentStatus::Expired => self.expired_at = Some(at),
            _ => {}
        }
        self.status = next;
        self.updated_at = at;
        Ok(())
    }

    pub fn is_trip_payment(&self) -> bool {
        self.payment_type == PaymentType::TripPayment
    }
}

/// Splits `amount` between the platform and the driver. The tip is never taxed.
pub fn split_fees(amount: i64, tip_amount: i64) -> (i64, i64) {
    let fare_part = amount - tip_amount;
    let platform_fee = (fare_part as f64 * PLATFORM_FEE_RATE).round() as i64;
    let driver_earnings = fare_part - platform_fee + tip_amount;
    (platform_fee, driver_earnings)
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Discount {
    Percent(u32),
    Flat(i64),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PromoCode {
    pub code: String,
    pub discount: Discount,
}

impl PromoCode {
    /// Discount against `fare`, never more than the fare itself.
    pub fn discount_for(&self, fare: i64) -> i64 {
        let raw = match self.discount {
            Discount::Percent(pct) => (fare as f64 * pct as f64 / 100.0).round() as i64,
            Discount::Flat(value) => value,
        };
        raw.clamp(0, fare.max(0))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub trip_id: String,
    #[serde(default)]
    pub tip_amount: i64,
    pub promo_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentIntentRequest {
    pub trip_id: String,
    #[serde(default)]
    pub tip_amount: i64,
    pub promo_code: Option<String>,
    pub payment_method_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TipRequest {
    pub trip_id: String,
    pub tip_amount: i64,
    pub payment_method_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentQuery {
    pub payment_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentMethodRequest {
    pub payment_method_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CheckoutSession {
    pub payment_id: String,
    pub session_id: String,
    pub url: String,
    pub amount: i64,
    pub currency: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IntentSummary {
    pub id: String,
    pub status: String,
    pub client_secret: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PaymentIntentResponse {
    pub payment: Payment,
    pub intent: IntentSummary,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReconcileOutcome {
    pub payment: Payment,
    /// This call moved the payment to `paid`.
    pub transitioned: bool,
    /// This call wrote the rider aggregate.
    pub rider_stats_updated: bool,
}

/// Reply to a processor webhook delivery.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WebhookAck {
    pub received: bool,
    pub event_id: String,
    /// Already processed on an earlier delivery.
    pub duplicate: bool,
}
