use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wayfare_core::users::Gender;
use wayfare_shared::models::events::{
    BookingCancelledEvent, EngineEvent, SeatsBookedEvent, TripPublishedEvent,
    TripStatusChangedEvent,
};
use wayfare_shared::TripId;
use wayfare_trip::models::{ParticipantStatus, RosterEntry, Trip, TripDraft, TripStatus};
use wayfare_trip::repository::TripFilter;

use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TripResponse {
    pub id: TripId,
    pub driver_id: Uuid,
    pub origin: String,
    pub destination: String,
    pub origin_city: Option<String>,
    pub destination_city: Option<String>,
    pub price_per_seat: Decimal,
    pub estimated_minutes: Option<i32>,
    pub total_seats: u32,
    pub available_seats: u32,
    pub status: TripStatus,
    pub starts_at: DateTime<Utc>,
    pub gender_preference: Option<Gender>,
    pub accepts_deliveries: bool,
    pub max_delivery_weight: Option<f64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<RosterEntry>>,
}

impl TripResponse {
    pub fn summary(trip: &Trip) -> Self {
        Self::build(trip, false)
    }

    /// Detail view; the roster includes the synthesized driver entry.
    fn detail(trip: &Trip) -> Self {
        Self::build(trip, true)
    }

    fn build(trip: &Trip, with_roster: bool) -> Self {
        Self {
            id: trip.id,
            driver_id: trip.driver_id,
            origin: trip.origin.clone(),
            destination: trip.destination.clone(),
            origin_city: trip.origin_city.clone(),
            destination_city: trip.destination_city.clone(),
            price_per_seat: trip.price_per_seat,
            estimated_minutes: trip.estimated_minutes,
            total_seats: trip.total_seats,
            available_seats: trip.available_seats,
            status: trip.status,
            starts_at: trip.starts_at,
            gender_preference: trip.gender_preference,
            accepts_deliveries: trip.accepts_deliveries,
            max_delivery_weight: trip.max_delivery_weight,
            created_at: trip.created_at,
            participants: with_roster.then(|| trip.roster()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListTripsQuery {
    pub driver_id: Option<Uuid>,
    pub starts_after: Option<DateTime<Utc>>,
    pub starts_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct BookSeatsRequest {
    pub seats: u32,
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub trip_id: TripId,
    pub user_id: Uuid,
    pub seats: u32,
    pub status: ParticipantStatus,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub refreshed: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/trips", post(publish_trip).get(list_trips))
        .route("/v1/trips/refresh", post(refresh_trips))
        .route("/v1/trips/{id}", get(get_trip))
        .route("/v1/trips/{id}/bookings", post(book_seats))
        .route("/v1/trips/{id}/bookings", delete(cancel_booking))
        .route("/v1/trips/{id}/complete", post(complete_trip))
}

async fn publish_trip(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(draft): Json<TripDraft>,
) -> Result<Json<TripResponse>, ApiError> {
    let trip = state.lifecycle.publish_trip(user.id, draft).await?;

    state
        .events
        .publish(EngineEvent::TripPublished(TripPublishedEvent {
            trip_id: trip.id,
            driver_id: trip.driver_id,
            origin: trip.origin.clone(),
            destination: trip.destination.clone(),
            departure_at: trip.starts_at.timestamp(),
            timestamp: state.clock.now().timestamp(),
        }));

    Ok(Json(TripResponse::detail(&trip)))
}

async fn list_trips(
    State(state): State<AppState>,
    Query(query): Query<ListTripsQuery>,
) -> Result<Json<Vec<TripResponse>>, ApiError> {
    let filter = TripFilter {
        driver_id: query.driver_id,
        starts_after: query.starts_after,
        starts_before: query.starts_before,
        ..TripFilter::open()
    };
    let trips = state.lifecycle.list_trips(filter).await?;
    Ok(Json(trips.iter().map(TripResponse::summary).collect()))
}

async fn get_trip(
    State(state): State<AppState>,
    Path(trip_id): Path<TripId>,
) -> Result<Json<TripResponse>, ApiError> {
    let trip = state.lifecycle.get_trip(trip_id).await?;
    Ok(Json(TripResponse::detail(&trip)))
}

async fn book_seats(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(trip_id): Path<TripId>,
    Json(req): Json<BookSeatsRequest>,
) -> Result<Json<BookingResponse>, ApiError> {
    let participant = match state.booking.book_trip(trip_id, user.id, req.seats).await {
        Ok(participant) => participant,
        Err(err) => {
            state.metrics.bookings_rejected.inc();
            return Err(err.into());
        }
    };
    state.metrics.bookings_confirmed.inc();

    // Best-effort event enrichment; the booking itself already committed.
    if let Ok(trip) = state.lifecycle.get_trip(trip_id).await {
        state
            .events
            .publish(EngineEvent::SeatsBooked(SeatsBookedEvent {
                trip_id,
                passenger_id: user.id,
                seats: participant.seats,
                seats_left: trip.available_seats,
                trip_full: trip.available_seats == 0,
                timestamp: state.clock.now().timestamp(),
            }));
    }

    Ok(Json(BookingResponse {
        trip_id: participant.trip_id,
        user_id: participant.user_id,
        seats: participant.seats,
        status: participant.status,
        joined_at: participant.joined_at,
    }))
}

/// Role-dispatched: a driver cancels the whole trip, a passenger releases
/// their own seats.
async fn cancel_booking(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(trip_id): Path<TripId>,
) -> Result<Json<TripResponse>, ApiError> {
    let before = state.lifecycle.get_trip(trip_id).await?;
    let trip = state.booking.cancel_booking(trip_id, user.id, user.role).await?;

    let event = if trip.status == TripStatus::Cancelled {
        EngineEvent::TripStatusChanged(TripStatusChangedEvent {
            trip_id,
            from: before.status.as_str().to_string(),
            to: trip.status.as_str().to_string(),
            timestamp: state.clock.now().timestamp(),
        })
    } else {
        let seats_released = trip.available_seats.saturating_sub(before.available_seats);
        EngineEvent::BookingCancelled(BookingCancelledEvent {
            trip_id,
            passenger_id: user.id,
            seats_released,
            timestamp: state.clock.now().timestamp(),
        })
    };
    state.events.publish(event);

    Ok(Json(TripResponse::detail(&trip)))
}

async fn complete_trip(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(trip_id): Path<TripId>,
) -> Result<Json<TripResponse>, ApiError> {
    let before = state.lifecycle.get_trip(trip_id).await?;
    let trip = state.lifecycle.complete_trip(trip_id, user.id).await?;

    state
        .events
        .publish(EngineEvent::TripStatusChanged(TripStatusChangedEvent {
            trip_id,
            from: before.status.as_str().to_string(),
            to: trip.status.as_str().to_string(),
            timestamp: state.clock.now().timestamp(),
        }));

    Ok(Json(TripResponse::detail(&trip)))
}

async fn refresh_trips(
    State(state): State<AppState>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let refreshed = state.lifecycle.refresh_all().await?;
    Ok(Json(RefreshResponse { refreshed }))
}
