use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use wayfare_core::EngineError;

/// Transport wrapper for engine failures. Business-rule violations map to
/// 4xx with a stable code string; only store faults become 500s.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            EngineError::Unauthorized(_) => (StatusCode::FORBIDDEN, "unauthorized"),
            EngineError::EmailNotConfirmed => (StatusCode::FORBIDDEN, "email_not_confirmed"),
            EngineError::NotVerified => (StatusCode::FORBIDDEN, "account_not_verified"),
            EngineError::OwnTripBooking => (StatusCode::CONFLICT, "own_trip_booking"),
            EngineError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
            EngineError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
            EngineError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            EngineError::InsufficientSeats { .. } => (StatusCode::CONFLICT, "insufficient_seats"),
            EngineError::GenderPreferenceMismatch => {
                (StatusCode::FORBIDDEN, "gender_preference_mismatch")
            }
            EngineError::AlreadyBooked => (StatusCode::CONFLICT, "already_booked"),
            EngineError::AlreadyCancelled => (StatusCode::CONFLICT, "already_cancelled"),
            EngineError::Expired => (StatusCode::GONE, "expired"),
            EngineError::MismatchedTrip => (StatusCode::CONFLICT, "mismatched_trip"),
            EngineError::Conflict => (StatusCode::CONFLICT, "conflict"),
            EngineError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("store failure: {}", self.0);
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };

        let body = Json(json!({
            "error": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}
