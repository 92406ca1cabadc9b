use uuid::Uuid;

use crate::{DeliveryRequestId, TripId};

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct TripPublishedEvent {
    pub trip_id: TripId,
    pub driver_id: Uuid,
    pub origin: String,
    pub destination: String,
    pub departure_at: i64,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct SeatsBookedEvent {
    pub trip_id: TripId,
    pub passenger_id: Uuid,
    pub seats: u32,
    pub seats_left: u32,
    pub trip_full: bool,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingCancelledEvent {
    pub trip_id: TripId,
    pub passenger_id: Uuid,
    pub seats_released: u32,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct TripStatusChangedEvent {
    pub trip_id: TripId,
    pub from: String,
    pub to: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct DeliveryStatusChangedEvent {
    pub request_id: DeliveryRequestId,
    pub trip_id: Option<TripId>,
    pub from: String,
    pub to: String,
    pub timestamp: i64,
}

/// Envelope published on the in-process bus. SSE subscribers filter by trip.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineEvent {
    TripPublished(TripPublishedEvent),
    SeatsBooked(SeatsBookedEvent),
    BookingCancelled(BookingCancelledEvent),
    TripStatusChanged(TripStatusChangedEvent),
    DeliveryStatusChanged(DeliveryStatusChangedEvent),
}

impl EngineEvent {
    pub fn trip_id(&self) -> Option<TripId> {
        match self {
            EngineEvent::TripPublished(e) => Some(e.trip_id),
            EngineEvent::SeatsBooked(e) => Some(e.trip_id),
            EngineEvent::BookingCancelled(e) => Some(e.trip_id),
            EngineEvent::TripStatusChanged(e) => Some(e.trip_id),
            EngineEvent::DeliveryStatusChanged(e) => e.trip_id,
        }
    }

    /// Stable event name used for SSE `event:` fields and log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::TripPublished(_) => "trip_published",
            EngineEvent::SeatsBooked(_) => "seats_booked",
            EngineEvent::BookingCancelled(_) => "booking_cancelled",
            EngineEvent::TripStatusChanged(_) => "trip_status_changed",
            EngineEvent::DeliveryStatusChanged(_) => "delivery_status_changed",
        }
    }
}
