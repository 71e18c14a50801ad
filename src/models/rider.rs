// src/models/rider.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{SparrowError, SparrowResult};

/// Aggregate counters written only by payment reconciliation.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct RiderStats {
    pub total_trips: u32,
    pub total_amount_spent: i64,
    pub last_payment_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Rider {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub device_token: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub is_active: bool,
    #[serde(default)]
    pub stats: RiderStats,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RiderRegistration {
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub device_token: Option<String>,
}

impl RiderRegistration {
    pub fn validate(&self) -> SparrowResult<()> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(crate::errors::ValidationError {
                field: "name".to_string(),
                message: "Name is required".to_string(),
            });
        }
        if !self.email.contains('@') {
            errors.push(crate::errors::ValidationError {
                field: "email".to_string(),
                message: "Email address is invalid".to_string(),
            });
        }
        if self.phone_number.trim().is_empty() {
            errors.push(crate::errors::ValidationError {
                field: "phone_number".to_string(),
                message: "Phone number is required".to_string(),
            });
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SparrowError::ValidationFailed(errors))
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RiderSummary {
    pub id: String,
    pub name: String,
    pub phone_number: String,
}

impl From<&Rider> for RiderSummary {
    fn from(rider: &Rider) -> Self {
        Self {
            id: rider.id.clone(),
            name: rider.name.clone(),
            phone_number: rider.phone_number.clone(),
        }
    }
}
