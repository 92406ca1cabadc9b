use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wayfare_core::users::Gender;
use wayfare_shared::TripId;

/// Trip status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    Pending,
    Confirmed,
    Ongoing,
    Completed,
    Cancelled,
}

impl TripStatus {
    /// Stable storage form.
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Pending => "PENDING",
            TripStatus::Confirmed => "CONFIRMED",
            TripStatus::Ongoing => "ONGOING",
            TripStatus::Completed => "COMPLETED",
            TripStatus::Cancelled => "CANCELLED",
        }
    }

    /// Strict parse of the storage form. Unknown values are a data fault the
    /// store surfaces, never a silent default.
    pub fn parse(s: &str) -> Option<TripStatus> {
        match s {
            "PENDING" => Some(TripStatus::Pending),
            "CONFIRMED" => Some(TripStatus::Confirmed),
            "ONGOING" => Some(TripStatus::Ongoing),
            "COMPLETED" => Some(TripStatus::Completed),
            "CANCELLED" => Some(TripStatus::Cancelled),
            _ => None,
        }
    }

    /// Completed and Cancelled admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Cancelled)
    }

    /// Open for booking and delivery matching.
    pub fn is_open(&self) -> bool {
        matches!(self, TripStatus::Pending | TripStatus::Confirmed)
    }
}

/// Join-request status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantStatus {
    Pending,
    Confirmed,
    Cancelled,
    Rejected,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Pending => "PENDING",
            ParticipantStatus::Confirmed => "CONFIRMED",
            ParticipantStatus::Cancelled => "CANCELLED",
            ParticipantStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<ParticipantStatus> {
        match s {
            "PENDING" => Some(ParticipantStatus::Pending),
            "CONFIRMED" => Some(ParticipantStatus::Confirmed),
            "CANCELLED" => Some(ParticipantStatus::Cancelled),
            "REJECTED" => Some(ParticipantStatus::Rejected),
            _ => None,
        }
    }

    /// Counts against the one-active-booking-per-user rule.
    pub fn is_active(&self) -> bool {
        matches!(self, ParticipantStatus::Pending | ParticipantStatus::Confirmed)
    }
}

/// A passenger's seat reservation against a trip. Keyed by (trip, user);
/// entries are never removed, their status flips instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub trip_id: TripId,
    pub user_id: Uuid,
    pub seats: u32,
    pub status: ParticipantStatus,
    pub joined_at: DateTime<Utc>,
}

/// A driver-published ride offer with fixed seat capacity and route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: TripId,
    pub driver_id: Uuid,
    pub origin: String,
    pub destination: String,
    pub origin_city: Option<String>,
    pub origin_lat: Option<f64>,
    pub origin_lon: Option<f64>,
    pub destination_city: Option<String>,
    pub destination_lat: Option<f64>,
    pub destination_lon: Option<f64>,
    pub price_per_seat: Decimal,
    pub estimated_minutes: Option<i32>,
    pub total_seats: u32,
    pub available_seats: u32,
    pub status: TripStatus,
    pub starts_at: DateTime<Utc>,
    pub gender_preference: Option<Gender>,
    pub accepts_deliveries: bool,
    pub max_delivery_weight: Option<f64>,
    pub participants: Vec<Participant>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

/// Driver-supplied fields for publishing a trip.
#[derive(Debug, Clone, Deserialize)]
pub struct TripDraft {
    pub origin: String,
    pub destination: String,
    pub origin_city: Option<String>,
    pub origin_lat: Option<f64>,
    pub origin_lon: Option<f64>,
    pub destination_city: Option<String>,
    pub destination_lat: Option<f64>,
    pub destination_lon: Option<f64>,
    pub price_per_seat: Decimal,
    pub estimated_minutes: Option<i32>,
    pub seats: u32,
    pub starts_at: DateTime<Utc>,
    pub gender_preference: Option<Gender>,
    #[serde(default)]
    pub accepts_deliveries: bool,
    pub max_delivery_weight: Option<f64>,
}

impl Trip {
    /// Build a fresh Pending trip from a draft. The store assigns the id.
    pub fn new(driver_id: Uuid, draft: TripDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            driver_id,
            origin: draft.origin,
            destination: draft.destination,
            origin_city: draft.origin_city,
            origin_lat: draft.origin_lat,
            origin_lon: draft.origin_lon,
            destination_city: draft.destination_city,
            destination_lat: draft.destination_lat,
            destination_lon: draft.destination_lon,
            price_per_seat: draft.price_per_seat,
            estimated_minutes: draft.estimated_minutes,
            total_seats: draft.seats,
            available_seats: draft.seats,
            status: TripStatus::Pending,
            starts_at: draft.starts_at,
            gender_preference: draft.gender_preference,
            accepts_deliveries: draft.accepts_deliveries,
            max_delivery_weight: draft.max_delivery_weight,
            participants: Vec::new(),
            version: 1,
            created_at: now,
        }
    }

    /// Seats currently held by confirmed participants.
    pub fn confirmed_seats(&self) -> u32 {
        self.participants
            .iter()
            .filter(|p| p.status == ParticipantStatus::Confirmed)
            .map(|p| p.seats)
            .sum()
    }

    pub fn has_confirmed_participants(&self) -> bool {
        self.participants
            .iter()
            .any(|p| p.status == ParticipantStatus::Confirmed)
    }

    /// Participant listing with the driver synthesized as an always-confirmed
    /// entry. The driver is never written to the ledger, so seat accounting
    /// runs over real bookings only.
    pub fn roster(&self) -> Vec<RosterEntry> {
        let mut entries = Vec::with_capacity(self.participants.len() + 1);
        entries.push(RosterEntry {
            user_id: self.driver_id,
            seats: 0,
            status: ParticipantStatus::Confirmed,
            joined_at: self.created_at,
            is_driver: true,
        });
        entries.extend(self.participants.iter().map(|p| RosterEntry {
            user_id: p.user_id,
            seats: p.seats,
            status: p.status,
            joined_at: p.joined_at,
            is_driver: false,
        }));
        entries
    }
}

/// Read-side participant view, including the synthesized driver entry.
#[derive(Debug, Clone, Serialize)]
pub struct RosterEntry {
    pub user_id: Uuid,
    pub seats: u32,
    pub status: ParticipantStatus,
    pub joined_at: DateTime<Utc>,
    pub is_driver: bool,
}
