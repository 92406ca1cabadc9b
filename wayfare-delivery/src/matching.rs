use chrono::{DateTime, Utc};

use wayfare_core::{EngineError, EngineResult};
use wayfare_trip::models::Trip;

use crate::models::DeliveryRequest;

/// Location equality used throughout matching: surrounding whitespace is
/// ignored and the comparison is case-insensitive. There is no geocoding or
/// distance tolerance.
pub fn locations_match(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Whether a trip can carry this request. Used both to build the matching
/// list and to re-validate a Pending request at acceptance time.
pub fn trip_accepts_request(trip: &Trip, request: &DeliveryRequest, now: DateTime<Utc>) -> bool {
    check_trip_for_request(trip, request, now).is_ok()
}

/// Same checks with a concrete reason for each rejection, for the operations
/// that must explain why a specific trip was refused.
pub fn check_trip_for_request(
    trip: &Trip,
    request: &DeliveryRequest,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    if !trip.accepts_deliveries {
        return Err(EngineError::invalid_state("trip does not accept deliveries"));
    }
    if !trip.status.is_open() {
        return Err(EngineError::invalid_state("trip is not open"));
    }
    if trip.starts_at <= now {
        return Err(EngineError::invalid_state("trip has already started"));
    }
    if trip.starts_at < request.window_start || trip.starts_at > request.window_end {
        return Err(EngineError::validation(
            "trip departure falls outside the delivery window",
        ));
    }
    if !locations_match(&trip.origin, &request.origin)
        || !locations_match(&trip.destination, &request.dropoff)
    {
        return Err(EngineError::validation("trip route does not match the request"));
    }
    if let Some(max) = trip.max_delivery_weight {
        if request.weight_kg > max {
            return Err(EngineError::validation(format!(
                "parcel weight {}kg exceeds the trip limit of {}kg",
                request.weight_kg, max
            )));
        }
    }
    Ok(())
}
