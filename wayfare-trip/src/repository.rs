use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use wayfare_core::repository::{StoreError, StoreResult, VersionConflict};
use wayfare_shared::TripId;

use crate::models::{Trip, TripStatus};

/// Store-side filter for trip listings.
#[derive(Debug, Clone, Default)]
pub struct TripFilter {
    pub statuses: Option<Vec<TripStatus>>,
    pub driver_id: Option<Uuid>,
    pub starts_after: Option<DateTime<Utc>>,
    pub starts_before: Option<DateTime<Utc>>,
}

impl TripFilter {
    /// Trips still open for booking and matching.
    pub fn open() -> Self {
        Self {
            statuses: Some(vec![TripStatus::Pending, TripStatus::Confirmed]),
            ..Self::default()
        }
    }

    pub fn matches(&self, trip: &Trip) -> bool {
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&trip.status) {
                return false;
            }
        }
        if let Some(driver_id) = self.driver_id {
            if trip.driver_id != driver_id {
                return false;
            }
        }
        if let Some(after) = self.starts_after {
            if trip.starts_at <= after {
                return false;
            }
        }
        if let Some(before) = self.starts_before {
            if trip.starts_at >= before {
                return false;
            }
        }
        true
    }
}

/// Storage contract for trips and their participant ledger.
#[async_trait]
pub trait TripRepository: Send + Sync {
    /// Trip fields only; the participant ledger is left empty. Booking paths
    /// must use `get_trip_with_participants`.
    async fn get_trip(&self, id: TripId) -> StoreResult<Option<Trip>>;

    /// Trip with the full participant ledger loaded.
    async fn get_trip_with_participants(&self, id: TripId) -> StoreResult<Option<Trip>>;

    /// Persists a new trip and assigns its id.
    async fn create_trip(&self, trip: Trip) -> StoreResult<Trip>;

    /// Persists the trip row and upserts the carried participants in one
    /// transaction. `trip.version` must be the version the caller read; a
    /// stale version fails with `VersionConflict`. Returns the new version.
    /// Ledger entries absent from the carried set are left untouched.
    async fn save_trip(&self, trip: &Trip) -> StoreResult<i64>;

    async fn list_trips(&self, filter: TripFilter) -> StoreResult<Vec<Trip>>;
}

/// In-memory trip store used by engine tests and local runs.
pub struct InMemoryTripStore {
    trips: RwLock<HashMap<TripId, Trip>>,
    next_id: AtomicI64,
}

impl InMemoryTripStore {
    pub fn new() -> Self {
        Self {
            trips: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for InMemoryTripStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TripRepository for InMemoryTripStore {
    async fn get_trip(&self, id: TripId) -> StoreResult<Option<Trip>> {
        Ok(self.trips.read().await.get(&id).map(|t| {
            let mut trip = t.clone();
            trip.participants.clear();
            trip
        }))
    }

    async fn get_trip_with_participants(&self, id: TripId) -> StoreResult<Option<Trip>> {
        Ok(self.trips.read().await.get(&id).cloned())
    }

    async fn create_trip(&self, mut trip: Trip) -> StoreResult<Trip> {
        trip.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        trip.version = 1;
        self.trips.write().await.insert(trip.id, trip.clone());
        Ok(trip)
    }

    async fn save_trip(&self, trip: &Trip) -> StoreResult<i64> {
        let mut trips = self.trips.write().await;
        let stored = trips
            .get_mut(&trip.id)
            .ok_or_else(|| -> StoreError { format!("trip {} does not exist", trip.id).into() })?;
        if stored.version != trip.version {
            return Err(Box::new(VersionConflict));
        }

        let mut next = trip.clone();
        next.version = trip.version + 1;
        for existing in &stored.participants {
            if !next.participants.iter().any(|p| p.user_id == existing.user_id) {
                next.participants.push(existing.clone());
            }
        }
        *stored = next;
        Ok(stored.version)
    }

    async fn list_trips(&self, filter: TripFilter) -> StoreResult<Vec<Trip>> {
        let trips = self.trips.read().await;
        let mut out: Vec<Trip> = trips
            .values()
            .filter(|t| filter.matches(t))
            .map(|t| {
                let mut trip = t.clone();
                trip.participants.clear();
                trip
            })
            .collect();
        out.sort_by_key(|t| t.id);
        Ok(out)
    }
}
