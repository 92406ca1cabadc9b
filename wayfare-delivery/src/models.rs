use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wayfare_core::{EngineError, EngineResult};
use wayfare_shared::pii::Masked;
use wayfare_shared::{DeliveryRequestId, TripId};

/// Delivery request status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    TripSelected,
    Accepted,
    InTransit,
    Delivered,
    Cancelled,
    Rejected,
}

impl DeliveryStatus {
    /// Stable storage form.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::TripSelected => "TRIP_SELECTED",
            DeliveryStatus::Accepted => "ACCEPTED",
            DeliveryStatus::InTransit => "IN_TRANSIT",
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::Cancelled => "CANCELLED",
            DeliveryStatus::Rejected => "REJECTED",
        }
    }

    /// Strict parse of the storage form. Unknown values are a data fault the
    /// store surfaces, never a silent default.
    pub fn parse(s: &str) -> Option<DeliveryStatus> {
        match s {
            "PENDING" => Some(DeliveryStatus::Pending),
            "TRIP_SELECTED" => Some(DeliveryStatus::TripSelected),
            "ACCEPTED" => Some(DeliveryStatus::Accepted),
            "IN_TRANSIT" => Some(DeliveryStatus::InTransit),
            "DELIVERED" => Some(DeliveryStatus::Delivered),
            "CANCELLED" => Some(DeliveryStatus::Cancelled),
            "REJECTED" => Some(DeliveryStatus::Rejected),
            _ => None,
        }
    }

    /// Legal transitions of the delivery state machine. Rejected requests are
    /// re-selectable by the sender; Delivered and Cancelled admit nothing.
    pub fn can_transition_to(&self, to: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (*self, to),
            (Pending, TripSelected)
                | (Pending, Accepted)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (TripSelected, Accepted)
                | (TripSelected, Rejected)
                | (TripSelected, Cancelled)
                | (Accepted, InTransit)
                | (InTransit, Delivered)
                | (Rejected, TripSelected)
        )
    }

    /// Still waiting for a trip: in scope for matching and the expiry sweep.
    pub fn is_sweepable(&self) -> bool {
        matches!(self, DeliveryStatus::Pending | DeliveryStatus::TripSelected)
    }
}

/// A parcel-delivery ask seeking a compatible trip. Created by the sender,
/// driven through its lifecycle by the driver of the assigned trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub id: DeliveryRequestId,
    pub sender_id: Uuid,
    pub receiver_phone: Masked<String>,
    pub origin: String,
    pub dropoff: String,
    pub weight_kg: f64,
    pub description: String,
    pub price: Decimal,
    pub status: DeliveryStatus,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub trip_id: Option<TripId>,
    pub notes: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

/// Sender-supplied fields for a new request.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryDraft {
    pub receiver_phone: String,
    pub origin: String,
    pub dropoff: String,
    pub weight_kg: f64,
    pub description: String,
    pub price: Decimal,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl DeliveryRequest {
    /// Validates a draft and builds a Pending request. The store assigns the
    /// id.
    pub fn new(sender_id: Uuid, draft: DeliveryDraft, now: DateTime<Utc>) -> EngineResult<Self> {
        if draft.origin.trim().is_empty() {
            return Err(EngineError::validation("pickup location must not be blank"));
        }
        if draft.dropoff.trim().is_empty() {
            return Err(EngineError::validation("dropoff location must not be blank"));
        }
        if draft.receiver_phone.trim().is_empty() {
            return Err(EngineError::validation("receiver phone must not be blank"));
        }
        if !(draft.weight_kg > 0.0) {
            return Err(EngineError::validation("weight must be positive"));
        }
        if draft.price < Decimal::ZERO {
            return Err(EngineError::validation("price must not be negative"));
        }
        if draft.window_end <= draft.window_start {
            return Err(EngineError::validation(
                "delivery window end must be after its start",
            ));
        }

        Ok(Self {
            id: 0,
            sender_id,
            receiver_phone: Masked(draft.receiver_phone),
            origin: draft.origin,
            dropoff: draft.dropoff,
            weight_kg: draft.weight_kg,
            description: draft.description,
            price: draft.price,
            status: DeliveryStatus::Pending,
            window_start: draft.window_start,
            window_end: draft.window_end,
            trip_id: None,
            notes: None,
            accepted_at: None,
            picked_up_at: None,
            delivered_at: None,
            version: 1,
            created_at: now,
        })
    }

    /// A window ending exactly now has not yet lapsed; expiry is strict.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.window_end < now
    }
}
