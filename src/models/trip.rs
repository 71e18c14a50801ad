// src/models/trip.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    errors::{SparrowError, SparrowResult},
    models::{
        driver::DriverProfile,
        fare::{FareBreakdown, VehicleClass},
        geo::{Coordinates, GeoPoint},
        rider::RiderSummary,
    },
};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Requested,
    DriverAssigned,
    DriverArriving,
    DriverArrived,
    TripStarted,
    Completed,
    CancelledByRider,
    CancelledByDriver,
    NoShow,
}

impl TripStatus {
    pub const ALL: [TripStatus; 9] = [
        TripStatus::Requested,
        TripStatus::DriverAssigned,
        TripStatus::DriverArriving,
        TripStatus::DriverArrived,
        TripStatus::TripStarted,
        TripStatus::Completed,
        TripStatus::CancelledByRider,
        TripStatus::CancelledByDriver,
        TripStatus::NoShow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Requested => "requested",
            TripStatus::DriverAssigned => "driver_assigned",
            TripStatus::DriverArriving => "driver_arriving",
            TripStatus::DriverArrived => "driver_arrived",
            TripStatus::TripStarted => "trip_started",
            TripStatus::Completed => "completed",
            TripStatus::CancelledByRider => "cancelled_by_rider",
            TripStatus::CancelledByDriver => "cancelled_by_driver",
            TripStatus::NoShow => "no_show",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TripStatus::Completed
                | TripStatus::CancelledByRider
                | TripStatus::CancelledByDriver
                | TripStatus::NoShow
        )
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            TripStatus::CancelledByRider | TripStatus::CancelledByDriver | TripStatus::NoShow
        )
    }

    /// Cancelled by either party. A no-show is terminal but not a cancellation request's outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TripStatus::CancelledByRider | TripStatus::CancelledByDriver)
    }

    /// A driver is attached and the trip has not finished: the window for route points.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            TripStatus::DriverAssigned
                | TripStatus::DriverArriving
                | TripStatus::DriverArrived
                | TripStatus::TripStarted
        )
    }

    /// Edges open to `advance_status`. Assignment and completion have their own
    /// operations and are deliberately absent here.
    pub fn can_advance_to(&self, next: TripStatus) -> bool {
        use TripStatus::*;
        match (self, next) {
            (DriverAssigned, DriverArriving) => true,
            (DriverArriving, DriverArrived) => true,
            (DriverArrived, TripStarted) => true,
            (from, to) if !from.is_terminal() && to.is_cancellation() => true,
            _ => false,
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Rider,
    Driver,
}

impl CancelledBy {
    pub fn status(&self) -> TripStatus {
        match self {
            CancelledBy::Rider => TripStatus::CancelledByRider,
            CancelledBy::Driver => TripStatus::CancelledByDriver,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TripPaymentStatus {
    #[default]
    Pending,
    Paid,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RoutePoint {
    pub timestamp: DateTime<Utc>,
    pub coordinates: Coordinates,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct TripDuration {
    pub estimated_min: i64,
    pub actual_min: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Trip {
    pub id: String,
    pub rider_id: String,
    pub driver_id: Option<String>,
    pub pickup_location: GeoPoint,
    #[serde(default)]
    pub stops: Vec<GeoPoint>,
    pub dropoff_location: GeoPoint,
    pub vehicle_class: VehicleClass,
    pub status: TripStatus,
    pub fare: FareBreakdown,
    pub distance_km: f64,
    pub duration: TripDuration,
    #[serde(default)]
    pub route: Vec<RoutePoint>,
    pub driver_assigned_at: Option<DateTime<Utc>>,
    pub driver_arriving_at: Option<DateTime<Utc>>,
    pub driver_arrived_at: Option<DateTime<Utc>>,
    pub trip_started_at: Option<DateTime<Utc>>,
    pub trip_completed_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub payment_status: TripPaymentStatus,
    pub payment_id: Option<String>,
    pub review_id: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trip {
    /// Moves to `status` and stamps the matching timestamp.
    /// Terminal states, cancellations included, share `trip_completed_at`.
    pub fn apply_status(&mut self, status: TripStatus, at: DateTime<Utc>) {
        match status {
            TripStatus::Requested => {}
            TripStatus::DriverAssigned => self.driver_assigned_at = Some(at),
            TripStatus::DriverArriving => self.driver_arriving_at = Some(at),
            TripStatus::DriverArrived => self.driver_arrived_at = Some(at),
            TripStatus::TripStarted => self.trip_started_at = Some(at),
            TripStatus::Completed
            | TripStatus::CancelledByRider
            | TripStatus::CancelledByDriver
            | TripStatus::NoShow => self.trip_completed_at = Some(at),
        }
        self.status = status;
        self.updated_at = at;
    }

    pub fn is_owned_by_rider(&self, rider_id: &str) -> bool {
        self.rider_id == rider_id
    }

    pub fn is_assigned_to(&self, driver_id: &str) -> bool {
        self.driver_id.as_deref() == Some(driver_id)
    }

    pub fn validate_points(&self) -> SparrowResult<()> {
        self.pickup_location.validate("pickup_location")?;
        self.dropoff_location.validate("dropoff_location")?;
        for (i, stop) in self.stops.iter().enumerate() {
            stop.validate(&format!("stops[{}]", i))?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TripRequest {
    pub pickup_location: Option<GeoPoint>,
    pub dropoff_location: Option<GeoPoint>,
    #[serde(default)]
    pub stops: Vec<GeoPoint>,
    pub vehicle_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignDriverRequest {
    pub driver_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TripStatusUpdate {
    pub status: TripStatus,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct CancelTripRequest {
    pub cancelled_by: Option<CancelledBy>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoutePointRequest {
    pub longitude: f64,
    pub latitude: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeTripRequest {
    pub actual_distance_km: f64,
    pub actual_duration_min: i64,
    /// Priced from the actuals and the estimate's surge when absent.
    pub fare: Option<FareBreakdown>,
}

impl FinalizeTripRequest {
    pub fn validate(&self) -> SparrowResult<()> {
        if !self.actual_distance_km.is_finite() || self.actual_distance_km < 0.0 {
            return Err(SparrowError::validation_error(
                "actual_distance_km",
                "Distance must be a non-negative number",
            ));
        }
        if self.actual_duration_min < 0 {
            return Err(SparrowError::validation_error(
                "actual_duration_min",
                "Duration cannot be negative",
            ));
        }
        if let Some(fare) = &self.fare {
            fare.validate()?;
        }
        Ok(())
    }
}

/// The trip with its rider and driver joined in by the service layer.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TripDetails {
    pub trip: Trip,
    pub rider: Option<RiderSummary>,
    pub driver: Option<DriverProfile>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use TripStatus::*;

    fn legal_edges() -> Vec<(TripStatus, TripStatus)> {
        let mut edges = vec![
            (DriverAssigned, DriverArriving),
            (DriverArriving, DriverArrived),
            (DriverArrived, TripStarted),
        ];
        for from in [Requested, DriverAssigned, DriverArriving, DriverArrived, TripStarted] {
            for to in [CancelledByRider, CancelledByDriver, NoShow] {
                edges.push((from, to));
            }
        }
        edges
    }

    #[test]
    fn test_advance_edge_set_is_exact() {
        let legal = legal_edges();
        for from in TripStatus::ALL {
            for to in TripStatus::ALL {
                assert_eq!(
                    from.can_advance_to(to),
                    legal.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_never_advance() {
        for from in TripStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in TripStatus::ALL {
                assert!(!from.can_advance_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_requested_cannot_skip_to_started() {
        assert!(!Requested.can_advance_to(TripStarted));
        assert!(!Requested.can_advance_to(DriverAssigned));
        assert!(!TripStarted.can_advance_to(Completed));
        assert!(!DriverArrived.can_advance_to(DriverArriving));
    }

    #[test]
    fn test_no_show_is_not_a_cancellation_outcome() {
        assert!(NoShow.is_cancellation());
        assert!(!NoShow.is_cancelled());
        assert!(CancelledByRider.is_cancelled());
        assert!(CancelledByDriver.is_cancelled());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_string(&CancelledByRider).unwrap(), "\"cancelled_by_rider\"");
        let parsed: TripStatus = serde_json::from_str("\"trip_started\"").unwrap();
        assert_eq!(parsed, TripStarted);
        for status in TripStatus::ALL {
            assert_eq!(serde_json::to_value(status).unwrap(), status.as_str());
        }
    }
}
