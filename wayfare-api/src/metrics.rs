use axum::extract::State;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

use crate::state::AppState;

/// Engine counters exposed on /metrics.
pub struct Metrics {
    pub registry: Registry,
    pub bookings_confirmed: IntCounter,
    pub bookings_rejected: IntCounter,
    pub deliveries_accepted: IntCounter,
    pub deliveries_delivered: IntCounter,
    pub requests_expired: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let bookings_confirmed =
            IntCounter::new("wayfare_bookings_confirmed_total", "Seat bookings confirmed")
                .expect("metric definition");
        let bookings_rejected =
            IntCounter::new("wayfare_bookings_rejected_total", "Seat bookings rejected")
                .expect("metric definition");
        let deliveries_accepted = IntCounter::new(
            "wayfare_deliveries_accepted_total",
            "Delivery requests accepted by a driver",
        )
        .expect("metric definition");
        let deliveries_delivered = IntCounter::new(
            "wayfare_deliveries_delivered_total",
            "Delivery requests marked delivered",
        )
        .expect("metric definition");
        let requests_expired = IntCounter::new(
            "wayfare_delivery_requests_expired_total",
            "Delivery requests cancelled by the expiry sweep",
        )
        .expect("metric definition");

        for collector in [
            &bookings_confirmed,
            &bookings_rejected,
            &deliveries_accepted,
            &deliveries_delivered,
            &requests_expired,
        ] {
            registry
                .register(Box::new(collector.clone()))
                .expect("metric registration");
        }

        Self {
            registry,
            bookings_confirmed,
            bookings_rejected,
            deliveries_accepted,
            deliveries_delivered,
            requests_expired,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn metrics_handler(State(state): State<AppState>) -> String {
    let encoder = TextEncoder::new();
    let families = state.metrics.registry.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
