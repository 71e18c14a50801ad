// src/config.rs
use chrono::{Duration, FixedOffset, Offset, Utc};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

use crate::{
    errors::{SparrowError, SparrowResult},
    models::payment::{Discount, PromoCode},
};

/// Stripe refuses session expiries under 30 minutes after creation. The extra minute
/// covers the time between computing the expiry and the session being created.
pub const MIN_CHECKOUT_TTL_MINS: i64 = 31;
/// Stripe's upper bound for a checkout session.
pub const MAX_CHECKOUT_TTL_MINS: i64 = 24 * 60;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// In-memory store when unset.
    pub redis_url: Option<String>,
    /// Mock processor when unset.
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub stripe_api_base: String,
    pub frontend_url: String,
    pub fcm_server_key: Option<String>,
    pub market_offset: FixedOffset,
    pub currency: String,
    pub promo_codes: PromoCatalogue,
    pub expiry_sweep_secs: u64,
    pub webhook_tolerance_secs: i64,
    pub checkout_ttl_mins: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            redis_url: None,
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            stripe_api_base: "https://api.stripe.com/v1".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            fcm_server_key: None,
            market_offset: FixedOffset::east_opt(330 * 60).unwrap_or_else(|| Utc.fix()),
            currency: "inr".to_string(),
            promo_codes: PromoCatalogue::default(),
            expiry_sweep_secs: 60,
            webhook_tolerance_secs: 300,
            checkout_ttl_mins: 30,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> SparrowResult<Self> {
        let defaults = Self::default();

        let offset_minutes: i32 = parse_var("SURGE_UTC_OFFSET_MINUTES", 330)?;
        let market_offset = FixedOffset::east_opt(offset_minutes * 60).ok_or_else(|| {
            SparrowError::InvalidConfiguration(format!(
                "SURGE_UTC_OFFSET_MINUTES out of range: {}",
                offset_minutes
            ))
        })?;

        let promo_codes = match optional_var("PROMO_CODES") {
            Some(raw) => raw.parse()?,
            None => PromoCatalogue::default(),
        };

        let config = Self {
            bind_addr: optional_var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            redis_url: optional_var("REDIS_URL"),
            stripe_secret_key: optional_var("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: optional_var("STRIPE_WEBHOOK_SECRET"),
            stripe_api_base: optional_var("STRIPE_API_BASE").unwrap_or(defaults.stripe_api_base),
            frontend_url: optional_var("FRONTEND_URL").unwrap_or(defaults.frontend_url),
            fcm_server_key: optional_var("FCM_SERVER_KEY"),
            market_offset,
            currency: optional_var("PAYMENT_CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or(defaults.currency),
            promo_codes,
            expiry_sweep_secs: parse_var("EXPIRY_SWEEP_SECS", defaults.expiry_sweep_secs)?,
            webhook_tolerance_secs: parse_var("WEBHOOK_TOLERANCE_SECS", defaults.webhook_tolerance_secs)?,
            checkout_ttl_mins: parse_var("CHECKOUT_TTL_MINS", defaults.checkout_ttl_mins)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SparrowResult<()> {
        if self.stripe_secret_key.is_some() && self.stripe_webhook_secret.is_none() {
            return Err(SparrowError::MissingEnvironmentVariable(
                "STRIPE_WEBHOOK_SECRET".to_string(),
            ));
        }
        if self.expiry_sweep_secs == 0 {
            return Err(SparrowError::InvalidConfiguration(
                "EXPIRY_SWEEP_SECS must be positive".to_string(),
            ));
        }
        if self.checkout_ttl_mins <= 0 {
            return Err(SparrowError::InvalidConfiguration(
                "CHECKOUT_TTL_MINS must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Checkout lifetime, kept inside the window the processor accepts.
    pub fn checkout_ttl(&self) -> Duration {
        let minutes = self
            .checkout_ttl_mins
            .clamp(MIN_CHECKOUT_TTL_MINS, MAX_CHECKOUT_TTL_MINS);
        if minutes != self.checkout_ttl_mins {
            tracing::debug!(
                "CHECKOUT_TTL_MINS {} adjusted to {}",
                self.checkout_ttl_mins, minutes
            );
        }
        Duration::minutes(minutes)
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> SparrowResult<T> {
    match optional_var(name) {
        Some(raw) => raw.parse().map_err(|_| {
            SparrowError::InvalidConfiguration(format!("{} has an invalid value: {}", name, raw))
        }),
        None => Ok(default),
    }
}

/// Promo codes keyed by upper-cased code.
#[derive(Debug, Clone, Default)]
pub struct PromoCatalogue {
    codes: HashMap<String, PromoCode>,
}

impl PromoCatalogue {
    pub fn lookup(&self, code: &str) -> Option<&PromoCode> {
        self.codes.get(&code.trim().to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl FromStr for PromoCatalogue {
    type Err = SparrowError;

    /// Parses `CODE:10%,OTHER:25`: a percentage or a flat amount in minor units.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut codes = HashMap::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let invalid = || SparrowError::InvalidConfiguration(format!("Invalid promo entry: {}", entry));
            let (code, value) = entry.split_once(':').ok_or_else(invalid)?;
            let code = code.trim().to_uppercase();
            if code.is_empty() {
                return Err(invalid());
            }
            let value = value.trim();
            let discount = match value.strip_suffix('%') {
                Some(pct) => {
                    let pct: u32 = pct.trim().parse().map_err(|_| invalid())?;
                    if pct == 0 || pct > 100 {
                        return Err(invalid());
                    }
                    Discount::Percent(pct)
                }
                None => {
                    let flat: i64 = value.parse().map_err(|_| invalid())?;
                    if flat <= 0 {
                        return Err(invalid());
                    }
                    Discount::Flat(flat)
                }
            };
            codes.insert(code.clone(), PromoCode { code, discount });
        }
        Ok(Self { codes })
    }
}
