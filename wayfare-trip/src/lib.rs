pub mod booking;
pub mod lifecycle;
pub mod models;
pub mod repository;

pub use booking::{BookingEngine, BookingRules};
pub use lifecycle::TripLifecycleEngine;
pub use models::{Participant, ParticipantStatus, RosterEntry, Trip, TripDraft, TripStatus};
pub use repository::{InMemoryTripStore, TripFilter, TripRepository};
