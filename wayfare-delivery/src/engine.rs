use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wayfare_core::clock::Clock;
use wayfare_core::users::{UserDirectory, UserRole};
use wayfare_core::{EngineError, EngineResult};
use wayfare_shared::{DeliveryRequestId, TripId};
use wayfare_trip::models::Trip;
use wayfare_trip::repository::{TripFilter, TripRepository};

use crate::matching::{check_trip_for_request, trip_accepts_request};
use crate::models::{DeliveryDraft, DeliveryRequest, DeliveryStatus};
use crate::repository::{DeliveryFilter, DeliveryRequestRepository};

/// Delivery limits and knobs sourced from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRules {
    pub save_retries: u32,
    /// Run the expiry sweep before listings that expose pending requests.
    pub sweep_on_read: bool,
}

impl Default for DeliveryRules {
    fn default() -> Self {
        Self {
            save_retries: 3,
            sweep_on_read: true,
        }
    }
}

/// Matches pending requests to eligible trips and drives delivery status
/// transitions. Every mutation goes through the versioned save, so a racing
/// accept/select/sweep loses cleanly instead of clobbering the winner.
pub struct DeliveryEngine {
    requests: Arc<dyn DeliveryRequestRepository>,
    trips: Arc<dyn TripRepository>,
    users: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
    rules: DeliveryRules,
}

impl DeliveryEngine {
    pub fn new(
        requests: Arc<dyn DeliveryRequestRepository>,
        trips: Arc<dyn TripRepository>,
        users: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
        rules: DeliveryRules,
    ) -> Self {
        Self {
            requests,
            trips,
            users,
            clock,
            rules,
        }
    }

    /// Validates a draft and persists it as a Pending request.
    pub async fn create_request(
        &self,
        sender_id: Uuid,
        draft: DeliveryDraft,
    ) -> EngineResult<DeliveryRequest> {
        self.users
            .get_user(sender_id)
            .await
            .map_err(EngineError::from_store)?
            .ok_or(EngineError::NotFound("user"))?;

        let request = DeliveryRequest::new(sender_id, draft, self.clock.now())?;
        self.requests
            .create_request(request)
            .await
            .map_err(EngineError::from_store)
    }

    pub async fn get_request(&self, id: DeliveryRequestId) -> EngineResult<DeliveryRequest> {
        self.load(id).await
    }

    pub async fn list_for_sender(&self, sender_id: Uuid) -> EngineResult<Vec<DeliveryRequest>> {
        self.requests
            .list_requests(DeliveryFilter {
                sender_id: Some(sender_id),
                ..DeliveryFilter::default()
            })
            .await
            .map_err(EngineError::from_store)
    }

    /// Requests assigned to any of the driver's trips.
    pub async fn list_for_driver(&self, driver_id: Uuid) -> EngineResult<Vec<DeliveryRequest>> {
        let trips = self
            .trips
            .list_trips(TripFilter {
                driver_id: Some(driver_id),
                ..TripFilter::default()
            })
            .await
            .map_err(EngineError::from_store)?;
        let trip_ids: Vec<TripId> = trips.iter().map(|t| t.id).collect();
        if trip_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.requests
            .list_requests(DeliveryFilter {
                trip_ids: Some(trip_ids),
                ..DeliveryFilter::default()
            })
            .await
            .map_err(EngineError::from_store)
    }

    /// All trips that could carry a Pending request. A lapsed request is
    /// cancelled on the spot and reported as expired.
    pub async fn matching_trips(&self, request_id: DeliveryRequestId) -> EngineResult<Vec<Trip>> {
        let request = self.load(request_id).await?;
        let now = self.clock.now();

        if request.status == DeliveryStatus::Pending && request.is_expired(now) {
            self.cancel_expired(request).await?;
            return Err(EngineError::Expired);
        }
        if request.status != DeliveryStatus::Pending {
            return Err(EngineError::invalid_state(
                "only pending requests can be matched",
            ));
        }

        let trips = self
            .trips
            .list_trips(TripFilter::open())
            .await
            .map_err(EngineError::from_store)?;
        Ok(trips
            .into_iter()
            .filter(|t| trip_accepts_request(t, &request, now))
            .collect())
    }

    /// Sender picks a trip for their request. Legal from Pending, and from
    /// Rejected so a refused request can be re-routed to another trip.
    pub async fn select_trip(
        &self,
        user_id: Uuid,
        request_id: DeliveryRequestId,
        trip_id: TripId,
        notes: Option<String>,
    ) -> EngineResult<DeliveryRequest> {
        for _ in 0..self.rules.save_retries {
            let mut request = self.load(request_id).await?;
            let now = self.clock.now();

            if request.sender_id != user_id {
                return Err(EngineError::unauthorized(
                    "only the sender can select a trip for this request",
                ));
            }
            if !matches!(
                request.status,
                DeliveryStatus::Pending | DeliveryStatus::Rejected
            ) {
                return Err(EngineError::invalid_state(format!(
                    "cannot select a trip while the request is {}",
                    request.status.as_str()
                )));
            }
            if request.is_expired(now) {
                if request.status == DeliveryStatus::Pending {
                    self.cancel_expired(request).await?;
                }
                return Err(EngineError::Expired);
            }

            let trip = self
                .trips
                .get_trip(trip_id)
                .await
                .map_err(EngineError::from_store)?
                .ok_or(EngineError::NotFound("trip"))?;
            check_trip_for_request(&trip, &request, now)?;

            request.trip_id = Some(trip.id);
            request.status = DeliveryStatus::TripSelected;
            if notes.is_some() {
                request.notes = notes.clone();
            }

            match self.save(&mut request).await {
                Ok(()) => return Ok(request),
                Err(EngineError::Conflict) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(EngineError::Conflict)
    }

    /// Driver takes the request onto their trip. A TripSelected request was
    /// validated against the trip at selection time and is trusted here; only
    /// a Pending request is re-checked for route and weight.
    pub async fn accept(
        &self,
        driver_id: Uuid,
        request_id: DeliveryRequestId,
        trip_id: TripId,
    ) -> EngineResult<DeliveryRequest> {
        let driver = self
            .users
            .get_user(driver_id)
            .await
            .map_err(EngineError::from_store)?
            .ok_or(EngineError::NotFound("user"))?;
        if driver.role != UserRole::Driver {
            return Err(EngineError::unauthorized(
                "only driver accounts can accept deliveries",
            ));
        }

        for _ in 0..self.rules.save_retries {
            let now = self.clock.now();
            let trip = self
                .trips
                .get_trip(trip_id)
                .await
                .map_err(EngineError::from_store)?
                .ok_or(EngineError::NotFound("trip"))?;
            if trip.driver_id != driver_id {
                return Err(EngineError::unauthorized("trip belongs to another driver"));
            }
            if !trip.accepts_deliveries {
                return Err(EngineError::invalid_state("trip does not accept deliveries"));
            }

            let mut request = self.load(request_id).await?;
            if !matches!(
                request.status,
                DeliveryStatus::Pending | DeliveryStatus::TripSelected
            ) {
                return Err(EngineError::invalid_state(format!(
                    "cannot accept a request that is {}",
                    request.status.as_str()
                )));
            }
            if request.status == DeliveryStatus::TripSelected && request.trip_id != Some(trip_id) {
                return Err(EngineError::MismatchedTrip);
            }
            if request.is_expired(now) {
                self.cancel_expired(request).await?;
                return Err(EngineError::Expired);
            }
            if request.status == DeliveryStatus::Pending {
                check_trip_for_request(&trip, &request, now)?;
            } else {
                if !trip.status.is_open() {
                    return Err(EngineError::invalid_state("trip is not open"));
                }
                if trip.starts_at <= now {
                    return Err(EngineError::invalid_state("trip has already started"));
                }
            }

            request.trip_id = Some(trip_id);
            request.status = DeliveryStatus::Accepted;
            request.accepted_at = Some(now);

            match self.save(&mut request).await {
                Ok(()) => {
                    tracing::info!(request_id, trip_id, "delivery request accepted");
                    return Ok(request);
                }
                Err(EngineError::Conflict) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(EngineError::Conflict)
    }

    /// Driver refuses a selected request. The trip association is cleared so
    /// the sender may pick a different trip.
    pub async fn reject(
        &self,
        driver_id: Uuid,
        request_id: DeliveryRequestId,
    ) -> EngineResult<DeliveryRequest> {
        for _ in 0..self.rules.save_retries {
            let mut request = self.load(request_id).await?;
            if request.status != DeliveryStatus::TripSelected {
                return Err(EngineError::invalid_state(
                    "only a selected request can be rejected",
                ));
            }
            let trip_id = request
                .trip_id
                .ok_or_else(|| EngineError::invalid_state("request has no trip assigned"))?;
            self.require_driver_of(trip_id, driver_id).await?;

            request.status = DeliveryStatus::Rejected;
            request.trip_id = None;

            match self.save(&mut request).await {
                Ok(()) => return Ok(request),
                Err(EngineError::Conflict) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(EngineError::Conflict)
    }

    /// Driver advances the request along the state machine, stamping the
    /// matching timestamp. The transition is checked against the stored
    /// status, not the caller's idea of it.
    pub async fn update_status(
        &self,
        driver_id: Uuid,
        request_id: DeliveryRequestId,
        new_status: DeliveryStatus,
        notes: Option<String>,
    ) -> EngineResult<DeliveryRequest> {
        for _ in 0..self.rules.save_retries {
            let mut request = self.load(request_id).await?;
            let trip_id = request
                .trip_id
                .ok_or_else(|| EngineError::invalid_state("request has no trip assigned"))?;
            self.require_driver_of(trip_id, driver_id).await?;

            if !request.status.can_transition_to(new_status) {
                return Err(EngineError::InvalidTransition {
                    from: request.status.as_str(),
                    to: new_status.as_str(),
                });
            }

            let now = self.clock.now();
            request.status = new_status;
            match new_status {
                DeliveryStatus::Accepted => request.accepted_at = Some(now),
                DeliveryStatus::InTransit => request.picked_up_at = Some(now),
                DeliveryStatus::Delivered => request.delivered_at = Some(now),
                DeliveryStatus::Rejected => request.trip_id = None,
                _ => {}
            }
            if notes.is_some() {
                request.notes = notes.clone();
            }

            match self.save(&mut request).await {
                Ok(()) => return Ok(request),
                Err(EngineError::Conflict) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(EngineError::Conflict)
    }

    /// Sender withdraws their request. The trip association is retained for
    /// the record.
    pub async fn cancel(
        &self,
        user_id: Uuid,
        request_id: DeliveryRequestId,
    ) -> EngineResult<DeliveryRequest> {
        for _ in 0..self.rules.save_retries {
            let mut request = self.load(request_id).await?;
            if request.sender_id != user_id {
                return Err(EngineError::unauthorized(
                    "only the sender can cancel this request",
                ));
            }
            if request.status == DeliveryStatus::Cancelled {
                return Err(EngineError::AlreadyCancelled);
            }
            if !request.status.is_sweepable() {
                return Err(EngineError::invalid_state(format!(
                    "cannot cancel a request that is {}",
                    request.status.as_str()
                )));
            }

            request.status = DeliveryStatus::Cancelled;

            match self.save(&mut request).await {
                Ok(()) => return Ok(request),
                Err(EngineError::Conflict) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(EngineError::Conflict)
    }

    pub fn rules(&self) -> &DeliveryRules {
        &self.rules
    }

    async fn load(&self, id: DeliveryRequestId) -> EngineResult<DeliveryRequest> {
        self.requests
            .get_request(id)
            .await
            .map_err(EngineError::from_store)?
            .ok_or(EngineError::NotFound("delivery request"))
    }

    async fn require_driver_of(&self, trip_id: TripId, driver_id: Uuid) -> EngineResult<()> {
        let trip = self
            .trips
            .get_trip(trip_id)
            .await
            .map_err(EngineError::from_store)?
            .ok_or(EngineError::NotFound("trip"))?;
        if trip.driver_id != driver_id {
            return Err(EngineError::unauthorized("trip belongs to another driver"));
        }
        Ok(())
    }

    async fn save(&self, request: &mut DeliveryRequest) -> EngineResult<()> {
        let version = self
            .requests
            .save_request(request)
            .await
            .map_err(EngineError::from_store)?;
        request.version = version;
        Ok(())
    }

    /// Best-effort cancellation of a lapsed request. A racing writer winning
    /// the version check means the request already moved on; that is fine,
    /// the caller still reports expiry against the state it observed.
    async fn cancel_expired(&self, mut request: DeliveryRequest) -> EngineResult<()> {
        request.status = DeliveryStatus::Cancelled;
        match self.save(&mut request).await {
            Ok(()) | Err(EngineError::Conflict) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryDeliveryStore;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use wayfare_core::clock::FixedClock;
    use wayfare_core::users::{InMemoryUserDirectory, UserAccount};
    use wayfare_trip::models::TripDraft;
    use wayfare_trip::repository::InMemoryTripStore;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap()
    }

    struct Fixture {
        engine: DeliveryEngine,
        requests: Arc<InMemoryDeliveryStore>,
        trips: Arc<InMemoryTripStore>,
        users: Arc<InMemoryUserDirectory>,
        clock: Arc<FixedClock>,
    }

    fn fixture() -> Fixture {
        let requests = Arc::new(InMemoryDeliveryStore::new());
        let trips = Arc::new(InMemoryTripStore::new());
        let users = Arc::new(InMemoryUserDirectory::new());
        let clock = Arc::new(FixedClock::new(base_time()));
        let engine = DeliveryEngine::new(
            requests.clone(),
            trips.clone(),
            users.clone(),
            clock.clone(),
            DeliveryRules::default(),
        );
        Fixture {
            engine,
            requests,
            trips,
            users,
            clock,
        }
    }

    async fn seeded_user(fx: &Fixture, role: UserRole) -> Uuid {
        let id = Uuid::new_v4();
        fx.users.upsert(UserAccount::new(id, role)).await;
        id
    }

    async fn seeded_trip(fx: &Fixture, driver_id: Uuid, starts_in: Duration) -> Trip {
        let draft = TripDraft {
            origin: "Bratislava".to_string(),
            destination: "Vienna".to_string(),
            origin_city: None,
            origin_lat: None,
            origin_lon: None,
            destination_city: None,
            destination_lat: None,
            destination_lon: None,
            price_per_seat: Decimal::new(1500, 2),
            estimated_minutes: Some(75),
            seats: 3,
            starts_at: base_time() + starts_in,
            gender_preference: None,
            accepts_deliveries: true,
            max_delivery_weight: Some(10.0),
        };
        fx.trips
            .create_trip(Trip::new(driver_id, draft, base_time()))
            .await
            .unwrap()
    }

    fn draft() -> DeliveryDraft {
        DeliveryDraft {
            receiver_phone: "+421900123456".to_string(),
            origin: " bratislava ".to_string(),
            dropoff: "VIENNA".to_string(),
            weight_kg: 2.5,
            description: "documents".to_string(),
            price: Decimal::new(800, 2),
            window_start: base_time(),
            window_end: base_time() + Duration::hours(48),
        }
    }

    async fn seeded_request(fx: &Fixture, sender: Uuid) -> DeliveryRequest {
        fx.engine.create_request(sender, draft()).await.unwrap()
    }

    async fn stored(fx: &Fixture, id: DeliveryRequestId) -> DeliveryRequest {
        fx.requests.get_request(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_matching_lists_only_compatible_trips() {
        let fx = fixture();
        let driver = seeded_user(&fx, UserRole::Driver).await;
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let good = seeded_trip(&fx, driver, Duration::hours(6)).await;

        // Wrong route.
        let other_driver = seeded_user(&fx, UserRole::Driver).await;
        let mut wrong_route = seeded_trip(&fx, other_driver, Duration::hours(6)).await;
        wrong_route.destination = "Budapest".to_string();
        fx.trips.save_trip(&wrong_route).await.unwrap();

        // Departure outside the window.
        seeded_trip(&fx, driver, Duration::hours(72)).await;

        // Deliveries disabled.
        let mut closed = seeded_trip(&fx, driver, Duration::hours(6)).await;
        closed.accepts_deliveries = false;
        fx.trips.save_trip(&closed).await.unwrap();

        let request = seeded_request(&fx, sender).await;
        let matches = fx.engine.matching_trips(request.id).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, good.id);
    }

    #[tokio::test]
    async fn test_matching_expired_pending_request_auto_cancels() {
        let fx = fixture();
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let request = seeded_request(&fx, sender).await;

        fx.clock.set(base_time() + Duration::hours(49));
        let err = fx.engine.matching_trips(request.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Expired));
        assert_eq!(stored(&fx, request.id).await.status, DeliveryStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_matching_rejects_non_pending_requests() {
        let fx = fixture();
        let driver = seeded_user(&fx, UserRole::Driver).await;
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let trip = seeded_trip(&fx, driver, Duration::hours(6)).await;
        let request = seeded_request(&fx, sender).await;
        fx.engine
            .select_trip(sender, request.id, trip.id, None)
            .await
            .unwrap();

        let err = fx.engine.matching_trips(request.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_select_trip_assigns_and_stores_notes() {
        let fx = fixture();
        let driver = seeded_user(&fx, UserRole::Driver).await;
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let trip = seeded_trip(&fx, driver, Duration::hours(6)).await;
        let request = seeded_request(&fx, sender).await;

        let selected = fx
            .engine
            .select_trip(sender, request.id, trip.id, Some("fragile".to_string()))
            .await
            .unwrap();
        assert_eq!(selected.status, DeliveryStatus::TripSelected);
        assert_eq!(selected.trip_id, Some(trip.id));
        assert_eq!(selected.notes.as_deref(), Some("fragile"));
    }

    #[tokio::test]
    async fn test_select_trip_requires_the_sender() {
        let fx = fixture();
        let driver = seeded_user(&fx, UserRole::Driver).await;
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let trip = seeded_trip(&fx, driver, Duration::hours(6)).await;
        let request = seeded_request(&fx, sender).await;

        let err = fx
            .engine
            .select_trip(Uuid::new_v4(), request.id, trip.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_select_trip_validates_route_and_weight() {
        let fx = fixture();
        let driver = seeded_user(&fx, UserRole::Driver).await;
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let trip = seeded_trip(&fx, driver, Duration::hours(6)).await;

        let mut heavy = draft();
        heavy.weight_kg = 25.0;
        let request = fx.engine.create_request(sender, heavy).await.unwrap();

        let err = fx
            .engine
            .select_trip(sender, request.id, trip.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(stored(&fx, request.id).await.status, DeliveryStatus::Pending);
    }

    #[tokio::test]
    async fn test_accept_selected_request_stamps_accepted_at() {
        let fx = fixture();
        let driver = seeded_user(&fx, UserRole::Driver).await;
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let trip = seeded_trip(&fx, driver, Duration::hours(6)).await;
        let request = seeded_request(&fx, sender).await;
        fx.engine
            .select_trip(sender, request.id, trip.id, None)
            .await
            .unwrap();

        let accepted = fx.engine.accept(driver, request.id, trip.id).await.unwrap();
        assert_eq!(accepted.status, DeliveryStatus::Accepted);
        assert_eq!(accepted.accepted_at, Some(base_time()));
        assert_eq!(accepted.trip_id, Some(trip.id));
    }

    #[tokio::test]
    async fn test_accept_pending_request_revalidates_match() {
        let fx = fixture();
        let driver = seeded_user(&fx, UserRole::Driver).await;
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let trip = seeded_trip(&fx, driver, Duration::hours(6)).await;

        let mut wrong = draft();
        wrong.dropoff = "Budapest".to_string();
        let request = fx.engine.create_request(sender, wrong).await.unwrap();

        let err = fx.engine.accept(driver, request.id, trip.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_accept_trusts_selected_requests_without_revalidation() {
        let fx = fixture();
        let driver = seeded_user(&fx, UserRole::Driver).await;
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let mut trip = seeded_trip(&fx, driver, Duration::hours(6)).await;
        let request = seeded_request(&fx, sender).await;
        fx.engine
            .select_trip(sender, request.id, trip.id, None)
            .await
            .unwrap();

        // The weight cap tightens after selection; acceptance still goes
        // through because the selected request is trusted.
        trip = fx.trips.get_trip(trip.id).await.unwrap().unwrap();
        trip.max_delivery_weight = Some(1.0);
        fx.trips.save_trip(&trip).await.unwrap();

        let accepted = fx.engine.accept(driver, request.id, trip.id).await.unwrap();
        assert_eq!(accepted.status, DeliveryStatus::Accepted);
    }

    #[tokio::test]
    async fn test_accept_with_mismatched_trip_leaves_request_untouched() {
        let fx = fixture();
        let driver = seeded_user(&fx, UserRole::Driver).await;
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let selected = seeded_trip(&fx, driver, Duration::hours(6)).await;
        let other = seeded_trip(&fx, driver, Duration::hours(8)).await;
        let request = seeded_request(&fx, sender).await;
        fx.engine
            .select_trip(sender, request.id, selected.id, None)
            .await
            .unwrap();

        let err = fx.engine.accept(driver, request.id, other.id).await.unwrap_err();
        assert!(matches!(err, EngineError::MismatchedTrip));

        let after = stored(&fx, request.id).await;
        assert_eq!(after.status, DeliveryStatus::TripSelected);
        assert_eq!(after.trip_id, Some(selected.id));
    }

    #[tokio::test]
    async fn test_accept_requires_driver_role_and_ownership() {
        let fx = fixture();
        let driver = seeded_user(&fx, UserRole::Driver).await;
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let trip = seeded_trip(&fx, driver, Duration::hours(6)).await;
        let request = seeded_request(&fx, sender).await;

        let err = fx.engine.accept(sender, request.id, trip.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));

        let outsider = seeded_user(&fx, UserRole::Driver).await;
        let err = fx
            .engine
            .accept(outsider, request.id, trip.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_accept_expired_request_cancels_it() {
        let fx = fixture();
        let driver = seeded_user(&fx, UserRole::Driver).await;
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let trip = seeded_trip(&fx, driver, Duration::hours(96)).await;
        let request = seeded_request(&fx, sender).await;

        fx.clock.set(base_time() + Duration::hours(50));
        let err = fx.engine.accept(driver, request.id, trip.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Expired));
        assert_eq!(stored(&fx, request.id).await.status, DeliveryStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_reject_clears_trip_and_allows_reselection() {
        let fx = fixture();
        let driver = seeded_user(&fx, UserRole::Driver).await;
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let first = seeded_trip(&fx, driver, Duration::hours(6)).await;
        let second = seeded_trip(&fx, driver, Duration::hours(9)).await;
        let request = seeded_request(&fx, sender).await;
        fx.engine
            .select_trip(sender, request.id, first.id, None)
            .await
            .unwrap();

        let rejected = fx.engine.reject(driver, request.id).await.unwrap();
        assert_eq!(rejected.status, DeliveryStatus::Rejected);
        assert_eq!(rejected.trip_id, None);

        let reselected = fx
            .engine
            .select_trip(sender, request.id, second.id, None)
            .await
            .unwrap();
        assert_eq!(reselected.status, DeliveryStatus::TripSelected);
        assert_eq!(reselected.trip_id, Some(second.id));
    }

    #[tokio::test]
    async fn test_reject_is_only_legal_from_trip_selected() {
        let fx = fixture();
        let driver = seeded_user(&fx, UserRole::Driver).await;
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let request = seeded_request(&fx, sender).await;

        let err = fx.engine.reject(driver, request.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_update_status_walks_the_happy_path_with_timestamps() {
        let fx = fixture();
        let driver = seeded_user(&fx, UserRole::Driver).await;
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let trip = seeded_trip(&fx, driver, Duration::hours(6)).await;
        let request = seeded_request(&fx, sender).await;
        fx.engine
            .select_trip(sender, request.id, trip.id, None)
            .await
            .unwrap();
        fx.engine.accept(driver, request.id, trip.id).await.unwrap();

        fx.clock.advance(Duration::hours(6));
        let picked = fx
            .engine
            .update_status(driver, request.id, DeliveryStatus::InTransit, None)
            .await
            .unwrap();
        assert_eq!(picked.picked_up_at, Some(base_time() + Duration::hours(6)));

        fx.clock.advance(Duration::hours(1));
        let delivered = fx
            .engine
            .update_status(
                driver,
                request.id,
                DeliveryStatus::Delivered,
                Some("left at reception".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(delivered.status, DeliveryStatus::Delivered);
        assert_eq!(delivered.delivered_at, Some(base_time() + Duration::hours(7)));
        assert_eq!(delivered.notes.as_deref(), Some("left at reception"));
    }

    #[tokio::test]
    async fn test_update_status_rejects_illegal_transitions() {
        let fx = fixture();
        let driver = seeded_user(&fx, UserRole::Driver).await;
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let trip = seeded_trip(&fx, driver, Duration::hours(6)).await;
        let request = seeded_request(&fx, sender).await;
        fx.engine
            .select_trip(sender, request.id, trip.id, None)
            .await
            .unwrap();

        // TripSelected cannot jump straight to Delivered.
        let err = fx
            .engine
            .update_status(driver, request.id, DeliveryStatus::Delivered, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: "TRIP_SELECTED",
                to: "DELIVERED",
            }
        ));
        assert_eq!(
            stored(&fx, request.id).await.status,
            DeliveryStatus::TripSelected
        );
    }

    #[tokio::test]
    async fn test_update_status_requires_an_assigned_trip() {
        let fx = fixture();
        let driver = seeded_user(&fx, UserRole::Driver).await;
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let request = seeded_request(&fx, sender).await;

        let err = fx
            .engine
            .update_status(driver, request.id, DeliveryStatus::Accepted, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_sender_cancel_legal_only_before_acceptance() {
        let fx = fixture();
        let driver = seeded_user(&fx, UserRole::Driver).await;
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let trip = seeded_trip(&fx, driver, Duration::hours(6)).await;
        let request = seeded_request(&fx, sender).await;
        fx.engine
            .select_trip(sender, request.id, trip.id, None)
            .await
            .unwrap();
        fx.engine.accept(driver, request.id, trip.id).await.unwrap();

        let err = fx.engine.cancel(sender, request.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
        assert_eq!(stored(&fx, request.id).await.status, DeliveryStatus::Accepted);
    }

    #[tokio::test]
    async fn test_sender_cancel_retains_trip_association() {
        let fx = fixture();
        let driver = seeded_user(&fx, UserRole::Driver).await;
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let trip = seeded_trip(&fx, driver, Duration::hours(6)).await;
        let request = seeded_request(&fx, sender).await;
        fx.engine
            .select_trip(sender, request.id, trip.id, None)
            .await
            .unwrap();

        let cancelled = fx.engine.cancel(sender, request.id).await.unwrap();
        assert_eq!(cancelled.status, DeliveryStatus::Cancelled);
        assert_eq!(cancelled.trip_id, Some(trip.id));

        let err = fx.engine.cancel(sender, request.id).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyCancelled));
    }

    #[tokio::test]
    async fn test_listing_by_driver_covers_assigned_requests_only() {
        let fx = fixture();
        let driver = seeded_user(&fx, UserRole::Driver).await;
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let trip = seeded_trip(&fx, driver, Duration::hours(6)).await;
        let assigned = seeded_request(&fx, sender).await;
        seeded_request(&fx, sender).await;
        fx.engine
            .select_trip(sender, assigned.id, trip.id, None)
            .await
            .unwrap();

        let for_driver = fx.engine.list_for_driver(driver).await.unwrap();
        assert_eq!(for_driver.len(), 1);
        assert_eq!(for_driver[0].id, assigned.id);

        let for_sender = fx.engine.list_for_sender(sender).await.unwrap();
        assert_eq!(for_sender.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_accepts_only_one_wins() {
        let fx = fixture();
        let driver_a = seeded_user(&fx, UserRole::Driver).await;
        let driver_b = seeded_user(&fx, UserRole::Driver).await;
        let sender = seeded_user(&fx, UserRole::Passenger).await;
        let trip_a = seeded_trip(&fx, driver_a, Duration::hours(6)).await;
        let trip_b = seeded_trip(&fx, driver_b, Duration::hours(7)).await;
        let request = seeded_request(&fx, sender).await;

        let (first, second) = tokio::join!(
            fx.engine.accept(driver_a, request.id, trip_a.id),
            fx.engine.accept(driver_b, request.id, trip_b.id),
        );

        // The loser re-reads an Accepted request and fails on state, never
        // silently overwriting the winner.
        let winners = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        let after = stored(&fx, request.id).await;
        assert_eq!(after.status, DeliveryStatus::Accepted);
        let winner_trip = if first.is_ok() { trip_a.id } else { trip_b.id };
        assert_eq!(after.trip_id, Some(winner_trip));
    }
}
