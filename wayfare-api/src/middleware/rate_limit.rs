use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tokio::sync::RwLock;

use crate::state::AppState;

#[derive(Debug, Clone)]
struct WindowInfo {
    requests: u32,
    window_start: Instant,
}

/// In-memory fixed-window limiter keyed by client IP.
#[derive(Clone)]
pub struct RateLimitState {
    windows: Arc<RwLock<HashMap<String, WindowInfo>>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimitState {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: Arc::new(RwLock::new(HashMap::new())),
            max_requests,
            window,
        }
    }

    pub async fn check(&self, key: &str) -> bool {
        let mut windows = self.windows.write().await;
        let now = Instant::now();

        windows.retain(|_, info| now.duration_since(info.window_start) < self.window);

        let info = windows.entry(key.to_string()).or_insert(WindowInfo {
            requests: 0,
            window_start: now,
        });
        if info.requests >= self.max_requests {
            return false;
        }
        info.requests += 1;
        true
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // First hop of X-Forwarded-For; direct connections have no proxy header
    // and share the fallback bucket.
    let ip = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "local".to_string());

    if state.rate_limit.check(&ip).await {
        Ok(next.run(req).await)
    } else {
        Err(StatusCode::TOO_MANY_REQUESTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limit_applies_per_key() {
        let limiter = RateLimitState::new(2, Duration::from_secs(60));

        assert!(limiter.check("10.0.0.1").await);
        assert!(limiter.check("10.0.0.1").await);
        assert!(!limiter.check("10.0.0.1").await);
        // Another client is unaffected.
        assert!(limiter.check("10.0.0.2").await);
    }
}
