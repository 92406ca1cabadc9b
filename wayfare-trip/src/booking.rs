use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wayfare_core::clock::Clock;
use wayfare_core::users::{UserDirectory, UserRole};
use wayfare_core::{EngineError, EngineResult};
use wayfare_shared::TripId;

use crate::lifecycle::refresh_status;
use crate::models::{Participant, ParticipantStatus, Trip, TripStatus};
use crate::repository::TripRepository;

/// Booking limits sourced from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRules {
    pub min_seats_per_booking: u32,
    pub max_seats_per_booking: u32,
    pub max_trip_capacity: u32,
    pub save_retries: u32,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            min_seats_per_booking: 1,
            max_seats_per_booking: 10,
            max_trip_capacity: 10,
            save_retries: 3,
        }
    }
}

/// Validates and applies join/cancel requests against a trip. Every mutation
/// goes through the versioned save; a lost race re-reads and re-validates, so
/// the loser of a last-seat race surfaces `InsufficientSeats`, not a
/// conflict.
pub struct BookingEngine {
    trips: Arc<dyn TripRepository>,
    users: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
    rules: BookingRules,
}

impl BookingEngine {
    pub fn new(
        trips: Arc<dyn TripRepository>,
        users: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
        rules: BookingRules,
    ) -> Self {
        Self {
            trips,
            users,
            clock,
            rules,
        }
    }

    /// Books `seats` for the user. Bookings confirm immediately; there is no
    /// driver-approval step for individual seats. Filling the last seat of a
    /// Pending trip confirms the trip.
    pub async fn book_trip(
        &self,
        trip_id: TripId,
        user_id: Uuid,
        seats: u32,
    ) -> EngineResult<Participant> {
        // 1. Structural seat bounds.
        if seats < self.rules.min_seats_per_booking || seats > self.rules.max_seats_per_booking {
            return Err(EngineError::validation(format!(
                "seat count must be between {} and {}",
                self.rules.min_seats_per_booking, self.rules.max_seats_per_booking
            )));
        }

        // 2.-4. Account eligibility.
        let user = self
            .users
            .get_user(user_id)
            .await
            .map_err(EngineError::from_store)?
            .ok_or(EngineError::NotFound("user"))?;
        if !user.email_confirmed {
            return Err(EngineError::EmailNotConfirmed);
        }
        if !user.is_verified {
            return Err(EngineError::NotVerified);
        }

        for _ in 0..self.rules.save_retries {
            let now = self.clock.now();

            // 5. Trip must exist.
            let mut trip = self
                .trips
                .get_trip_with_participants(trip_id)
                .await
                .map_err(EngineError::from_store)?
                .ok_or(EngineError::NotFound("trip"))?;
            refresh_status(&mut trip, now);

            // 6. Trip must still be open.
            if !trip.status.is_open() {
                return Err(EngineError::invalid_state("trip is not open for booking"));
            }
            // 7. Capacity.
            if trip.available_seats < seats {
                return Err(EngineError::InsufficientSeats {
                    requested: seats,
                    available: trip.available_seats,
                });
            }
            // 8. Gender preference applies only when both sides are known.
            if let (Some(pref), Some(gender)) = (trip.gender_preference, user.gender) {
                if pref != gender {
                    return Err(EngineError::GenderPreferenceMismatch);
                }
            }
            // 9. No self-booking.
            if trip.driver_id == user_id {
                return Err(EngineError::OwnTripBooking);
            }

            // 10. One active booking per user per trip. A cancelled or
            // rejected entry is revived in place, keyed by (trip, user).
            let participant = match trip.participants.iter_mut().find(|p| p.user_id == user_id) {
                Some(existing) if existing.status.is_active() => {
                    return Err(EngineError::AlreadyBooked);
                }
                Some(existing) => {
                    existing.seats = seats;
                    existing.status = ParticipantStatus::Confirmed;
                    existing.joined_at = now;
                    existing.clone()
                }
                None => {
                    let entry = Participant {
                        trip_id: trip.id,
                        user_id,
                        seats,
                        status: ParticipantStatus::Confirmed,
                        joined_at: now,
                    };
                    trip.participants.push(entry.clone());
                    entry
                }
            };

            trip.available_seats -= seats;
            refresh_status(&mut trip, now);

            match self.trips.save_trip(&trip).await.map_err(EngineError::from_store) {
                Ok(_) => {
                    tracing::debug!(trip_id, %user_id, seats, "seats booked");
                    return Ok(participant);
                }
                Err(EngineError::Conflict) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(EngineError::Conflict)
    }

    /// Cancels a booking. Drivers cancel the whole trip; passengers cancel
    /// their own seat reservation.
    pub async fn cancel_booking(
        &self,
        trip_id: TripId,
        user_id: Uuid,
        role: UserRole,
    ) -> EngineResult<Trip> {
        match role {
            UserRole::Driver => self.cancel_as_driver(trip_id, user_id).await,
            UserRole::Passenger => self.cancel_as_passenger(trip_id, user_id).await,
        }
    }

    async fn cancel_as_driver(&self, trip_id: TripId, driver_id: Uuid) -> EngineResult<Trip> {
        for _ in 0..self.rules.save_retries {
            let mut trip = self
                .trips
                .get_trip_with_participants(trip_id)
                .await
                .map_err(EngineError::from_store)?
                .ok_or(EngineError::NotFound("trip"))?;
            refresh_status(&mut trip, self.clock.now());

            if trip.driver_id != driver_id {
                return Err(EngineError::unauthorized(
                    "only the trip driver can cancel the trip",
                ));
            }
            if trip.status.is_terminal() {
                return Err(EngineError::invalid_state(format!(
                    "trip is already {}",
                    trip.status.as_str()
                )));
            }
            if trip.status == TripStatus::Ongoing {
                return Err(EngineError::invalid_state("trip has already started"));
            }

            for participant in trip.participants.iter_mut() {
                if participant.status.is_active() {
                    participant.status = ParticipantStatus::Cancelled;
                }
            }
            // Seats are not restored; the trip is dead.
            trip.status = TripStatus::Cancelled;

            match self.trips.save_trip(&trip).await.map_err(EngineError::from_store) {
                Ok(version) => {
                    trip.version = version;
                    tracing::info!(trip_id, "trip cancelled by driver");
                    return Ok(trip);
                }
                Err(EngineError::Conflict) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(EngineError::Conflict)
    }

    async fn cancel_as_passenger(&self, trip_id: TripId, user_id: Uuid) -> EngineResult<Trip> {
        for _ in 0..self.rules.save_retries {
            let mut trip = self
                .trips
                .get_trip_with_participants(trip_id)
                .await
                .map_err(EngineError::from_store)?
                .ok_or(EngineError::NotFound("trip"))?;
            refresh_status(&mut trip, self.clock.now());

            let Some(idx) = trip.participants.iter().position(|p| p.user_id == user_id) else {
                return Err(EngineError::NotFound("booking"));
            };
            if trip.participants[idx].status == ParticipantStatus::Cancelled {
                return Err(EngineError::AlreadyCancelled);
            }
            if trip.status == TripStatus::Completed {
                return Err(EngineError::invalid_state("trip is already completed"));
            }

            // Capture before the flip; seat restoration depends on the prior
            // status, never on the overwritten one.
            let was_confirmed = trip.participants[idx].status == ParticipantStatus::Confirmed;
            trip.participants[idx].status = ParticipantStatus::Cancelled;
            if was_confirmed {
                trip.available_seats += trip.participants[idx].seats;
                if trip.status == TripStatus::Confirmed && !trip.has_confirmed_participants() {
                    trip.status = TripStatus::Pending;
                }
            }

            match self.trips.save_trip(&trip).await.map_err(EngineError::from_store) {
                Ok(version) => {
                    trip.version = version;
                    return Ok(trip);
                }
                Err(EngineError::Conflict) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(EngineError::Conflict)
    }
}
