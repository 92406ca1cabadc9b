use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use wayfare_core::repository::{StoreError, StoreResult, VersionConflict};
use wayfare_shared::{DeliveryRequestId, TripId};

use crate::models::{DeliveryRequest, DeliveryStatus};

/// Store-side filter for request listings.
#[derive(Debug, Clone, Default)]
pub struct DeliveryFilter {
    pub statuses: Option<Vec<DeliveryStatus>>,
    pub sender_id: Option<Uuid>,
    pub trip_ids: Option<Vec<TripId>>,
}

impl DeliveryFilter {
    /// Requests still waiting for a trip: the expiry sweep's scope.
    pub fn sweepable() -> Self {
        Self {
            statuses: Some(vec![DeliveryStatus::Pending, DeliveryStatus::TripSelected]),
            ..Self::default()
        }
    }

    pub fn matches(&self, request: &DeliveryRequest) -> bool {
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&request.status) {
                return false;
            }
        }
        if let Some(sender_id) = self.sender_id {
            if request.sender_id != sender_id {
                return false;
            }
        }
        if let Some(trip_ids) = &self.trip_ids {
            match request.trip_id {
                Some(id) if trip_ids.contains(&id) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Storage contract for delivery requests.
#[async_trait]
pub trait DeliveryRequestRepository: Send + Sync {
    async fn get_request(&self, id: DeliveryRequestId) -> StoreResult<Option<DeliveryRequest>>;

    /// Persists a new request and assigns its id.
    async fn create_request(&self, request: DeliveryRequest) -> StoreResult<DeliveryRequest>;

    /// Persists the request. `request.version` must be the version the caller
    /// read; a stale version fails with `VersionConflict`. Returns the new
    /// version.
    async fn save_request(&self, request: &DeliveryRequest) -> StoreResult<i64>;

    async fn list_requests(&self, filter: DeliveryFilter) -> StoreResult<Vec<DeliveryRequest>>;
}

/// In-memory request store used by engine tests and local runs.
pub struct InMemoryDeliveryStore {
    requests: RwLock<HashMap<DeliveryRequestId, DeliveryRequest>>,
    next_id: AtomicI64,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for InMemoryDeliveryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryRequestRepository for InMemoryDeliveryStore {
    async fn get_request(&self, id: DeliveryRequestId) -> StoreResult<Option<DeliveryRequest>> {
        Ok(self.requests.read().await.get(&id).cloned())
    }

    async fn create_request(&self, mut request: DeliveryRequest) -> StoreResult<DeliveryRequest> {
        request.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        request.version = 1;
        self.requests.write().await.insert(request.id, request.clone());
        Ok(request)
    }

    async fn save_request(&self, request: &DeliveryRequest) -> StoreResult<i64> {
        let mut requests = self.requests.write().await;
        let stored = requests.get_mut(&request.id).ok_or_else(|| -> StoreError {
            format!("delivery request {} does not exist", request.id).into()
        })?;
        if stored.version != request.version {
            return Err(Box::new(VersionConflict));
        }

        let mut next = request.clone();
        next.version = request.version + 1;
        *stored = next;
        Ok(stored.version)
    }

    async fn list_requests(&self, filter: DeliveryFilter) -> StoreResult<Vec<DeliveryRequest>> {
        let requests = self.requests.read().await;
        let mut out: Vec<DeliveryRequest> = requests
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.id);
        Ok(out)
    }
}
