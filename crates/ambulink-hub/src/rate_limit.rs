use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::HubConfig;
use crate::error::AppError;

/// Fixed-window limiter keyed by endpoint and ambulance unit.
#[derive(Clone)]
pub struct EndpointRateLimiter {
    state: Arc<Mutex<HashMap<String, RateWindow>>>,
    window: Duration,
    limit: u32,
    metrics: Arc<RateLimitMetrics>,
}

#[derive(Clone, Copy)]
pub enum ProtectedEndpoint {
    RecordIntake,
    VitalsUpdate,
}

#[derive(Default)]
struct RateLimitMetrics {
    records_allowed: AtomicU64,
    records_limited: AtomicU64,
    vitals_allowed: AtomicU64,
    vitals_limited: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub records_allowed: u64,
    pub records_limited: u64,
    pub vitals_allowed: u64,
    pub vitals_limited: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    count: u32,
}

impl EndpointRateLimiter {
    pub fn from_config(config: &HubConfig) -> Self {
        Self::new(config.rate_limit_window, config.record_rate_limit_per_window)
    }

    fn new(window: Duration, limit: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            window,
            limit,
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    pub async fn check(&self, endpoint: ProtectedEndpoint, unit_id: &str) -> Result<(), AppError> {
        let key = format!("{}:{unit_id}", endpoint.label());
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let entry = guard.entry(key).or_insert(RateWindow {
            started_at: now,
            count: 0,
        });

        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= self.limit {
            let retry_after_secs = self
                .window
                .saturating_sub(now.duration_since(entry.started_at))
                .as_secs();
            self.counter(endpoint, false).fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                endpoint = endpoint.label(),
                unit = unit_fingerprint(unit_id),
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(AppError::too_many_requests(
                "Rate limit exceeded for ambulance unit",
                retry_after_secs,
            ));
        }

        entry.count += 1;
        self.counter(endpoint, true).fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            records_allowed: self.metrics.records_allowed.load(Ordering::Relaxed),
            records_limited: self.metrics.records_limited.load(Ordering::Relaxed),
            vitals_allowed: self.metrics.vitals_allowed.load(Ordering::Relaxed),
            vitals_limited: self.metrics.vitals_limited.load(Ordering::Relaxed),
        }
    }

    fn counter(&self, endpoint: ProtectedEndpoint, allowed: bool) -> &AtomicU64 {
        match (endpoint, allowed) {
            (ProtectedEndpoint::RecordIntake, true) => &self.metrics.records_allowed,
            (ProtectedEndpoint::RecordIntake, false) => &self.metrics.records_limited,
            (ProtectedEndpoint::VitalsUpdate, true) => &self.metrics.vitals_allowed,
            (ProtectedEndpoint::VitalsUpdate, false) => &self.metrics.vitals_limited,
        }
    }
}

impl ProtectedEndpoint {
    pub const fn label(self) -> &'static str {
        match self {
            Self::RecordIntake => "record_intake",
            Self::VitalsUpdate => "vitals_update",
        }
    }
}

pub fn unit_fingerprint(unit_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    unit_id.hash(&mut hasher);
    hasher.finish()
}
