use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use wayfare_core::clock::Clock;
use wayfare_core::users::{UserDirectory, UserRole};
use wayfare_core::{EngineError, EngineResult};
use wayfare_shared::TripId;

use crate::booking::BookingRules;
use crate::models::{Trip, TripDraft, TripStatus};
use crate::repository::{TripFilter, TripRepository};

/// Applies the automatic transitions to a loaded trip. Returns true when the
/// status changed. Idempotent: a second application is a no-op.
pub fn refresh_status(trip: &mut Trip, now: DateTime<Utc>) -> bool {
    let mut changed = false;
    if trip.status == TripStatus::Pending && trip.available_seats == 0 {
        trip.status = TripStatus::Confirmed;
        changed = true;
    }
    if trip.status.is_open() && now >= trip.starts_at {
        trip.status = TripStatus::Ongoing;
        changed = true;
    }
    changed
}

/// Drives trip publication, completion and the automatic status refresh.
pub struct TripLifecycleEngine {
    trips: Arc<dyn TripRepository>,
    users: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
    rules: BookingRules,
}

impl TripLifecycleEngine {
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

    /// Validates a draft and persists it as a Pending trip.
    pub async fn publish_trip(&self, driver_id: Uuid, draft: TripDraft) -> EngineResult<Trip> {
        let now = self.clock.now();
        self.validate_draft(&draft, now)?;

        let driver = self
            .users
            .get_user(driver_id)
            .await
            .map_err(EngineError::from_store)?
            .ok_or(EngineError::NotFound("user"))?;
        if driver.role != UserRole::Driver {
            return Err(EngineError::unauthorized(
                "only driver accounts can publish trips",
            ));
        }
        if !driver.email_confirmed {
            return Err(EngineError::EmailNotConfirmed);
        }
        if !driver.is_verified {
            return Err(EngineError::NotVerified);
        }

        let trip = Trip::new(driver_id, draft, now);
        let trip = self
            .trips
            .create_trip(trip)
            .await
            .map_err(EngineError::from_store)?;
        tracing::info!(trip_id = trip.id, %driver_id, "trip published");
        Ok(trip)
    }

    /// Trip with ledger, refreshed lazily. A racing writer may win the
    /// refresh save; the returned view is current either way.
    pub async fn get_trip(&self, trip_id: TripId) -> EngineResult<Trip> {
        let mut trip = self
            .trips
            .get_trip_with_participants(trip_id)
            .await
            .map_err(EngineError::from_store)?
            .ok_or(EngineError::NotFound("trip"))?;

        if refresh_status(&mut trip, self.clock.now()) {
            match self.trips.save_trip(&trip).await.map_err(EngineError::from_store) {
                Ok(version) => trip.version = version,
                Err(EngineError::Conflict) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(trip)
    }

    pub async fn list_trips(&self, filter: TripFilter) -> EngineResult<Vec<Trip>> {
        self.trips
            .list_trips(filter)
            .await
            .map_err(EngineError::from_store)
    }

    /// Explicit driver action closing the trip. Legal from any non-terminal
    /// status.
    pub async fn complete_trip(&self, trip_id: TripId, driver_id: Uuid) -> EngineResult<Trip> {
        for _ in 0..self.rules.save_retries {
            let mut trip = self
                .trips
                .get_trip_with_participants(trip_id)
                .await
                .map_err(EngineError::from_store)?
                .ok_or(EngineError::NotFound("trip"))?;

            if trip.driver_id != driver_id {
                return Err(EngineError::unauthorized(
                    "only the trip driver can complete the trip",
                ));
            }
            if trip.status.is_terminal() {
                return Err(EngineError::invalid_state(format!(
                    "trip is already {}",
                    trip.status.as_str()
                )));
            }

            trip.status = TripStatus::Completed;
            match self.trips.save_trip(&trip).await.map_err(EngineError::from_store) {
                Ok(version) => {
                    trip.version = version;
                    tracing::info!(trip_id, "trip completed");
                    return Ok(trip);
                }
                Err(EngineError::Conflict) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(EngineError::Conflict)
    }

    /// Refreshes one trip and persists the result when anything changed.
    pub async fn refresh_trip(&self, trip_id: TripId) -> EngineResult<Trip> {
        for _ in 0..self.rules.save_retries {
            let mut trip = self
                .trips
                .get_trip(trip_id)
                .await
                .map_err(EngineError::from_store)?
                .ok_or(EngineError::NotFound("trip"))?;

            if !refresh_status(&mut trip, self.clock.now()) {
                return Ok(trip);
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

    /// Batch sweep over every open trip. Returns how many trips changed.
    /// Version losers are skipped; the racing writer re-reads state itself.
    pub async fn refresh_all(&self) -> EngineResult<usize> {
        let now = self.clock.now();
        let trips = self
            .trips
            .list_trips(TripFilter::open())
            .await
            .map_err(EngineError::from_store)?;

        let mut refreshed = 0;
        for mut trip in trips {
            if !refresh_status(&mut trip, now) {
                continue;
            }
            match self.trips.save_trip(&trip).await.map_err(EngineError::from_store) {
                Ok(_) => refreshed += 1,
                Err(EngineError::Conflict) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(refreshed)
    }

    fn validate_draft(&self, draft: &TripDraft, now: DateTime<Utc>) -> EngineResult<()> {
        if draft.origin.trim().is_empty() {
            return Err(EngineError::validation("origin must not be blank"));
        }
        if draft.destination.trim().is_empty() {
            return Err(EngineError::validation("destination must not be blank"));
        }
        if draft.seats < 1 || draft.seats > self.rules.max_trip_capacity {
            return Err(EngineError::validation(format!(
                "seat capacity must be between 1 and {}",
                self.rules.max_trip_capacity
            )));
        }
        if draft.price_per_seat < Decimal::ZERO {
            return Err(EngineError::validation("price per seat must not be negative"));
        }
        if draft.starts_at <= now {
            return Err(EngineError::validation("trip start must be in the future"));
        }
        if let Some(minutes) = draft.estimated_minutes {
            if minutes <= 0 {
                return Err(EngineError::validation("estimated duration must be positive"));
            }
        }
        if let Some(weight) = draft.max_delivery_weight {
            if !(weight > 0.0) {
                return Err(EngineError::validation("max delivery weight must be positive"));
            }
        }
        Ok(())
    }
}
