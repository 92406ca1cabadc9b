use std::sync::Arc;

use wayfare_core::clock::Clock;
use wayfare_core::{EngineError, EngineResult};

use crate::models::DeliveryStatus;
use crate::repository::{DeliveryFilter, DeliveryRequestRepository};

/// Cancels Pending and TripSelected requests whose delivery window has
/// lapsed. Invoked opportunistically ahead of reads that expose pending
/// requests, and on an explicit operator trigger; scheduling lives with the
/// caller.
pub struct ExpirySweeper {
    requests: Arc<dyn DeliveryRequestRepository>,
    clock: Arc<dyn Clock>,
}

impl ExpirySweeper {
    pub fn new(requests: Arc<dyn DeliveryRequestRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            requests,
            clock,
        }
    }

    /// Returns how many requests were cancelled. Idempotent: a second run
    /// over the same data sweeps nothing. A request whose version moved
    /// between the read and the save is skipped; the racing accept or select
    /// already owns it.
    pub async fn sweep(&self) -> EngineResult<usize> {
        let now = self.clock.now();
        let candidates = self
            .requests
            .list_requests(DeliveryFilter::sweepable())
            .await
            .map_err(EngineError::from_store)?;

        let mut swept = 0;
        for mut request in candidates {
            if !request.is_expired(now) {
                continue;
            }
            request.status = DeliveryStatus::Cancelled;
            match self.requests.save_request(&request).await {
                Ok(_) => swept += 1,
                Err(err) => match EngineError::from_store(err) {
                    EngineError::Conflict => {}
                    other => return Err(other),
                },
            }
        }
        if swept > 0 {
            tracing::info!(swept, "expired delivery requests cancelled");
        }
        Ok(swept)
    }
}
