// src/services/fare_engine.rs
use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc, Weekday};
use rand::Rng;
use std::collections::HashMap;

use crate::{
    errors::SparrowError as AppError,
    models::{
        fare::{FareBreakdown, FareEstimate, FareRate, SurgeFactors, VehicleClass},
        geo::{round2, GeoPoint},
    },
};

pub const PEAK_SURGE: f64 = 1.5;
pub const LATE_NIGHT_SURGE: f64 = 1.4;
pub const WEEKEND_SURGE: f64 = 1.3;
pub const RANDOM_SPIKE_SURGE: f64 = 1.2;
pub const RANDOM_SPIKE_PROBABILITY: f64 = 0.2;
/// 30 km/h: two minutes per kilometre.
pub const MINUTES_PER_KM: f64 = 2.0;

pub fn default_rates() -> HashMap<VehicleClass, FareRate> {
    HashMap::from([
        (VehicleClass::Sedan, FareRate { base_fare: 50, per_km_rate: 12, per_min_rate: 2 }),
        (VehicleClass::Suv, FareRate { base_fare: 80, per_km_rate: 18, per_min_rate: 3 }),
        (VehicleClass::Van, FareRate { base_fare: 100, per_km_rate: 22, per_min_rate: 4 }),
    ])
}

/// Prices trips. Estimates are advisory: surge is sampled from the clock and a
/// random source each call and is only frozen when the trip is finalized.
#[derive(Debug, Clone)]
pub struct FareEngine {
    rates: HashMap<VehicleClass, FareRate>,
    market_offset: FixedOffset,
    currency: String,
}

impl FareEngine {
    pub fn new(market_offset: FixedOffset, currency: impl Into<String>) -> Self {
        Self {
            rates: default_rates(),
            market_offset,
            currency: currency.into(),
        }
    }

    pub fn with_rates(mut self, rates: HashMap<VehicleClass, FareRate>) -> Self {
        self.rates = rates;
        self
    }

    pub fn rate_for(&self, vehicle_class: VehicleClass) -> Result<FareRate, AppError> {
        self.rates.get(&vehicle_class).copied().ok_or_else(|| AppError::InvalidFieldValue {
            field: "vehicle_type".to_string(),
            value: vehicle_class.to_string(),
            reason: "no tariff configured for this vehicle class".to_string(),
        })
    }

    pub fn estimate(
        &self,
        pickup: &GeoPoint,
        dropoff: &GeoPoint,
        vehicle_type: &str,
    ) -> Result<FareEstimate, AppError> {
        let vehicle_class: VehicleClass = vehicle_type.parse()?;
        let spike = rand::rng().random_bool(RANDOM_SPIKE_PROBABILITY);
        self.estimate_at(pickup, dropoff, vehicle_class, Utc::now(), spike)
    }

    /// Deterministic core of [`FareEngine::estimate`].
    pub fn estimate_at(
        &self,
        pickup: &GeoPoint,
        dropoff: &GeoPoint,
        vehicle_class: VehicleClass,
        now: DateTime<Utc>,
        random_spike: bool,
    ) -> Result<FareEstimate, AppError> {
        pickup.coordinates.validate("pickup_location")?;
        dropoff.coordinates.validate("dropoff_location")?;

        let distance_km = round2(pickup.coordinates.haversine_km(&dropoff.coordinates));
        // Time is priced from the exact duration; only the reported minutes are rounded.
        let duration_min = distance_km * MINUTES_PER_KM;
        let estimated_duration_min = duration_min.round() as i64;
        let (surge_multiplier, surge_factors) = self.surge_at(now, random_spike);
        let fare = self.price(vehicle_class, distance_km, duration_min, surge_multiplier)?;

        tracing::debug!(
            "Fare estimate {} {:.2} km {} min surge {}: {}",
            vehicle_class, distance_km, estimated_duration_min, surge_multiplier, fare.total_fare
        );

        Ok(FareEstimate {
            distance_km,
            estimated_duration_min,
            fare,
            surge_factors,
        })
    }

    /// Surge in the market's local time. Windows are whole hours, inclusive.
    pub fn surge_at(&self, now: DateTime<Utc>, random_spike: bool) -> (f64, SurgeFactors) {
        let local = now.with_timezone(&self.market_offset);
        let hour = local.hour();

        let factors = SurgeFactors {
            peak_hour: (7..=10).contains(&hour) || (17..=20).contains(&hour),
            weekend: matches!(local.weekday(), Weekday::Sat | Weekday::Sun),
            late_night: hour >= 22 || hour <= 5,
            random_spike,
        };

        let mut multiplier: f64 = 1.0;
        if factors.peak_hour {
            multiplier = multiplier.max(PEAK_SURGE);
        }
        if factors.weekend {
            multiplier = multiplier.max(WEEKEND_SURGE);
        }
        if factors.late_night {
            multiplier = multiplier.max(LATE_NIGHT_SURGE);
        }
        if factors.random_spike {
            multiplier = multiplier.max(RANDOM_SPIKE_SURGE);
        }

        (round2(multiplier), factors)
    }

    /// Breakdown for a known distance and duration. Components are rounded one by one;
    /// the total is rounded once from the unrounded sum.
    pub fn price(
        &self,
        vehicle_class: VehicleClass,
        distance_km: f64,
        duration_min: f64,
        surge_multiplier: f64,
    ) -> Result<FareBreakdown, AppError> {
        let rate = self.rate_for(vehicle_class)?;
        let distance_part = distance_km * rate.per_km_rate as f64;
        let time_part = duration_min * rate.per_min_rate as f64;
        let subtotal = rate.base_fare as f64 + distance_part + time_part;

        Ok(FareBreakdown {
            base_fare: rate.base_fare,
            distance_fare: distance_part.round() as i64,
            time_fare: time_part.round() as i64,
            surge_multiplier,
            total_fare: (subtotal * surge_multiplier).round() as i64,
            currency: self.currency.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn engine() -> FareEngine {
        FareEngine::new(FixedOffset::east_opt(330 * 60).unwrap(), "inr")
    }

    fn at_local(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        FixedOffset::east_opt(330 * 60)
            .unwrap()
            .with_ymd_and_hms(y, m, d, h, 30, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn pickup() -> GeoPoint {
        GeoPoint::new(77.5946, 12.9716, "MG Road")
    }

    fn dropoff() -> GeoPoint {
        GeoPoint::new(77.6412, 13.0012, "Hebbal")
    }

    // 2025-10-15 is a Wednesday.
    const QUIET_HOUR: u32 = 14;

    #[test]
    fn test_sedan_scenario_without_surge() {
        let estimate = engine()
            .estimate_at(&pickup(), &dropoff(), VehicleClass::Sedan, at_local(2025, 10, 15, QUIET_HOUR), false)
            .unwrap();

        assert_eq!(estimate.distance_km, 6.03);
        assert_eq!(estimate.estimated_duration_min, 12);
        assert_eq!(estimate.fare.surge_multiplier, 1.0);
        assert_eq!(estimate.fare.base_fare, 50);
        assert_eq!(estimate.fare.distance_fare, 72);
        assert_eq!(estimate.fare.time_fare, 24);
        assert_eq!(estimate.fare.total_fare, 146);
        assert_eq!(estimate.surge_factors, SurgeFactors::default());
    }

    #[test]
    fn test_time_fare_uses_unrounded_duration() {
        let start = GeoPoint::new(0.0, 0.0, "A");
        let end = GeoPoint::new(0.0, 0.0561, "B");
        let estimate = engine()
            .estimate_at(&start, &end, VehicleClass::Sedan, at_local(2025, 10, 15, QUIET_HOUR), false)
            .unwrap();

        assert_eq!(estimate.distance_km, 6.24);
        assert_eq!(estimate.estimated_duration_min, 12);
        assert_eq!(estimate.fare.distance_fare, 75);
        assert_eq!(estimate.fare.time_fare, 25);
        assert_eq!(estimate.fare.total_fare, 150);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let engine = engine();
        let now = at_local(2025, 10, 15, QUIET_HOUR);
        let points = [
            pickup(),
            dropoff(),
            GeoPoint::new(-0.1276, 51.5072, "London"),
            GeoPoint::new(151.2093, -33.8688, "Sydney"),
        ];
        for a in &points {
            for b in &points {
                let ab = engine.estimate_at(a, b, VehicleClass::Van, now, false).unwrap();
                let ba = engine.estimate_at(b, a, VehicleClass::Van, now, false).unwrap();
                assert_eq!(ab.distance_km, ba.distance_km);
            }
        }
    }

    #[test]
    fn test_surge_windows() {
        let engine = engine();
        let cases = [
            (at_local(2025, 10, 15, 8), false, 1.5),
            (at_local(2025, 10, 15, 20), false, 1.5),
            (at_local(2025, 10, 15, 21), false, 1.0),
            (at_local(2025, 10, 15, 23), false, 1.4),
            (at_local(2025, 10, 15, 5), false, 1.4),
            (at_local(2025, 10, 18, QUIET_HOUR), false, 1.3),
            (at_local(2025, 10, 18, 9), false, 1.5),
            (at_local(2025, 10, 19, 2), false, 1.4),
            (at_local(2025, 10, 15, QUIET_HOUR), true, 1.2),
            (at_local(2025, 10, 18, QUIET_HOUR), true, 1.3),
        ];
        for (now, spike, expected) in cases {
            assert_eq!(engine.surge_at(now, spike).0, expected, "{} spike={}", now, spike);
        }
    }

    #[test]
    fn test_surge_is_evaluated_in_market_time() {
        // 03:00 UTC is 08:30 in the market: peak, not late night.
        let now = Utc.with_ymd_and_hms(2025, 10, 15, 3, 0, 0).unwrap();
        let (multiplier, factors) = engine().surge_at(now, false);
        assert_eq!(multiplier, 1.5);
        assert!(factors.peak_hour);
        assert!(!factors.late_night);
    }

    #[test]
    fn test_surge_applies_to_total_only() {
        let fare = engine().price(VehicleClass::Sedan, 6.03, 12.06, 1.5).unwrap();
        assert_eq!(fare.distance_fare, 72);
        assert_eq!(fare.total_fare, 220);
    }

    #[test]
    fn test_unknown_vehicle_class_is_rejected() {
        let err = engine().estimate(&pickup(), &dropoff(), "Rickshaw").unwrap_err();
        assert_eq!(err.kind(), "validation_error");

        let sedan_only = engine().with_rates(HashMap::from([(
            VehicleClass::Sedan,
            FareRate { base_fare: 50, per_km_rate: 12, per_min_rate: 2 },
        )]));
        assert!(sedan_only.price(VehicleClass::Van, 1.0, 2.0, 1.0).is_err());
    }

    #[test]
    fn test_invalid_coordinates_are_rejected() {
        let bad = GeoPoint::new(200.0, 12.0, "Nowhere");
        let err = engine()
            .estimate_at(&bad, &dropoff(), VehicleClass::Sedan, Utc::now(), false)
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }
}
