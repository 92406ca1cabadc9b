use std::sync::Arc;

use wayfare_core::clock::Clock;
use wayfare_core::users::UserDirectory;
use wayfare_delivery::{DeliveryEngine, ExpirySweeper};
use wayfare_store::EventBus;
use wayfare_trip::{BookingEngine, TripLifecycleEngine};

use crate::metrics::Metrics;
use crate::middleware::rate_limit::RateLimitState;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<TripLifecycleEngine>,
    pub booking: Arc<BookingEngine>,
    pub deliveries: Arc<DeliveryEngine>,
    pub sweeper: Arc<ExpirySweeper>,
    pub users: Arc<dyn UserDirectory>,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
    pub auth: AuthConfig,
    pub metrics: Arc<Metrics>,
    pub rate_limit: RateLimitState,
}
