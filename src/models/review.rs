// src/models/review.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{SparrowError, SparrowResult};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Review {
    pub id: String,
    pub trip_id: String,
    pub rider_id: String,
    pub driver_id: String,
    pub rating: f64,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub rating: f64,
    pub comment: Option<String>,
}

impl ReviewRequest {
    /// Ratings run from 1 to 5 in half steps.
    pub fn validate(&self) -> SparrowResult<()> {
        let doubled = self.rating * 2.0;
        if !self.rating.is_finite() || !(1.0..=5.0).contains(&self.rating) || doubled.fract() != 0.0 {
            return Err(SparrowError::validation_error(
                "rating",
                "Rating must be between 1 and 5 in steps of 0.5",
            ));
        }
        if self.comment.as_ref().is_some_and(|c| c.chars().count() > 500) {
            return Err(SparrowError::validation_error(
                "comment",
                "Comment cannot exceed 500 characters",
            ));
        }
        Ok(())
    }
}

/// Average of `ratings` to one decimal, 0 when there are none.
pub fn average_rating(ratings: &[f64]) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }
    let mean = ratings.iter().sum::<f64>() / ratings.len() as f64;
    (mean * 10.0).round() / 10.0
}
