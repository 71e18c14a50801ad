use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Main error type for the sparrow-rides service
#[derive(Debug)]
pub enum SparrowError {
    // HTTP and API errors
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),

    // Validation errors
    ValidationFailed(Vec<ValidationError>),
    MissingRequiredField(String),
    InvalidFieldValue { field: String, value: String, reason: String },

    // Business logic errors
    RiderNotFound(String),
    DriverNotFound(String),
    TripNotFound(String),
    PaymentNotFound(String),
    DriverNotAvailable(String),
    TripAlreadyAssigned(String),
    DuplicatePayment(String),
    InvalidTransition { from: String, to: String },
    AmountMismatch { amount: i64, calculated: i64 },

    // Payment processor errors
    ProcessorRequest(String),
    ProcessorRejected { status: u16, message: String },
    InvalidSignature(String),

    // Store errors
    RedisConnection(String),
    RedisQuery(String),
    Serialization(String),

    // Network and HTTP client errors
    NetworkTimeout,
    NetworkConnection(String),
    HttpClient(String),

    // Notification errors (never surfaced to API callers)
    FcmDelivery(String),
    FcmInvalidToken(String),

    // Configuration and setup errors
    InvalidConfiguration(String),
    MissingEnvironmentVariable(String),

    InternalServer(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl fmt::Display for SparrowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SparrowError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            SparrowError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            SparrowError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            SparrowError::NotFound(msg) => write!(f, "Not found: {}", msg),
            SparrowError::Conflict(msg) => write!(f, "Conflict: {}", msg),

            SparrowError::ValidationFailed(errors) => {
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                write!(f, "Validation failed for: {}", fields.join(", "))
            }
            SparrowError::MissingRequiredField(field) => write!(f, "Missing required field: {}", field),
            SparrowError::InvalidFieldValue { field, value, reason } => {
                write!(f, "Invalid value '{}' for field '{}': {}", value, field, reason)
            }

            SparrowError::RiderNotFound(id) => write!(f, "Rider not found: {}", id),
            SparrowError::DriverNotFound(id) => write!(f, "Driver not found: {}", id),
            SparrowError::TripNotFound(id) => write!(f, "Trip not found: {}", id),
            SparrowError::PaymentNotFound(id) => write!(f, "Payment not found: {}", id),
            SparrowError::DriverNotAvailable(id) => write!(f, "Driver is not available: {}", id),
            SparrowError::TripAlreadyAssigned(id) => write!(f, "Trip is no longer open for assignment: {}", id),
            SparrowError::DuplicatePayment(trip_id) => write!(f, "Trip already has an active payment: {}", trip_id),
            SparrowError::InvalidTransition { from, to } => {
                write!(f, "Invalid status transition from {} to {}", from, to)
            }
            SparrowError::AmountMismatch { amount, calculated } => write!(
                f,
                "Payment amount {} does not match calculated total {}",
                amount, calculated
            ),

            SparrowError::ProcessorRequest(msg) => write!(f, "Payment processor request failed: {}", msg),
            SparrowError::ProcessorRejected { status, message } => {
                write!(f, "Payment processor rejected request ({}): {}", status, message)
            }
            SparrowError::InvalidSignature(msg) => write!(f, "Webhook signature verification failed: {}", msg),

            SparrowError::RedisConnection(msg) => write!(f, "Redis connection error: {}", msg),
            SparrowError::RedisQuery(msg) => write!(f, "Redis query error: {}", msg),
            SparrowError::Serialization(msg) => write!(f, "Serialization error: {}", msg),

            SparrowError::NetworkTimeout => write!(f, "Network request timed out"),
            SparrowError::NetworkConnection(msg) => write!(f, "Network connection error: {}", msg),
            SparrowError::HttpClient(msg) => write!(f, "HTTP client error: {}", msg),

            SparrowError::FcmDelivery(msg) => write!(f, "FCM delivery error: {}", msg),
            SparrowError::FcmInvalidToken(msg) => write!(f, "Invalid FCM token: {}", msg),

            SparrowError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
            SparrowError::MissingEnvironmentVariable(var) => {
                write!(f, "Missing environment variable: {}", var)
            }

            SparrowError::InternalServer(msg) => write!(f, "Internal server error: {}", msg),
        }
    }
}

impl std::error::Error for SparrowError {}

impl SparrowError {
    /// Stable machine-readable kind, shared by logs and API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            SparrowError::BadRequest(_) => "bad_request",
            SparrowError::Unauthorized(_) => "unauthorized",
            SparrowError::Forbidden(_) => "forbidden",
            SparrowError::ValidationFailed(_)
            | SparrowError::MissingRequiredField(_)
            | SparrowError::InvalidFieldValue { .. } => "validation_error",
            SparrowError::NotFound(_)
            | SparrowError::RiderNotFound(_)
            | SparrowError::DriverNotFound(_)
            | SparrowError::TripNotFound(_)
            | SparrowError::PaymentNotFound(_) => "not_found",
            SparrowError::Conflict(_)
            | SparrowError::DriverNotAvailable(_)
            | SparrowError::TripAlreadyAssigned(_)
            | SparrowError::DuplicatePayment(_) => "conflict",
            SparrowError::InvalidTransition { .. } => "invalid_transition",
            SparrowError::AmountMismatch { .. } => "amount_mismatch",
            SparrowError::InvalidSignature(_) => "invalid_signature",
            SparrowError::ProcessorRequest(_)
            | SparrowError::ProcessorRejected { .. }
            | SparrowError::RedisConnection(_)
            | SparrowError::RedisQuery(_)
            | SparrowError::NetworkTimeout
            | SparrowError::NetworkConnection(_)
            | SparrowError::HttpClient(_) => "upstream_error",
            _ => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            "bad_request" | "validation_error" | "invalid_signature" => StatusCode::BAD_REQUEST,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "forbidden" => StatusCode::FORBIDDEN,
            "not_found" => StatusCode::NOT_FOUND,
            "conflict" | "invalid_transition" => StatusCode::CONFLICT,
            "amount_mismatch" => StatusCode::UNPROCESSABLE_ENTITY,
            "upstream_error" => match self {
                SparrowError::RedisConnection(_) | SparrowError::RedisQuery(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::BAD_GATEWAY,
            },
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SparrowError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let details = match &self {
            SparrowError::ValidationFailed(errors) => serde_json::to_value(errors).ok(),
            SparrowError::InvalidTransition { from, to } => {
                Some(serde_json::json!({ "from": from, "to": to }))
            }
            _ => None,
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        let error_response = ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
            details,
        };

        (status, axum::Json(error_response)).into_response()
    }
}

// Convenience type alias for Results
pub type SparrowResult<T> = Result<T, SparrowError>;

impl From<redis::RedisError> for SparrowError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::IoError => SparrowError::RedisConnection(err.to_string()),
            redis::ErrorKind::AuthenticationFailed => {
                SparrowError::RedisConnection("Authentication failed".to_string())
            }
            _ => SparrowError::RedisQuery(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for SparrowError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SparrowError::NetworkTimeout
        } else if err.is_connect() {
            SparrowError::NetworkConnection(err.to_string())
        } else {
            SparrowError::HttpClient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SparrowError {
    fn from(err: serde_json::Error) -> Self {
        SparrowError::Serialization(err.to_string())
    }
}

// Helper functions for creating common errors
impl SparrowError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        SparrowError::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        SparrowError::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        SparrowError::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        SparrowError::Conflict(msg.into())
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        SparrowError::InternalServer(msg.into())
    }

    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        SparrowError::ValidationFailed(vec![ValidationError {
            field: field.into(),
            message: message.into(),
        }])
    }

    pub fn invalid_transition(from: impl fmt::Display, to: impl fmt::Display) -> Self {
        SparrowError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == "not_found"
    }
}
