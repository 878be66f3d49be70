//! Endpoint health tracking.
//!
//! Tracks consecutive connection results per endpoint with exponential
//! backoff between checks of a failing endpoint.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Point-in-time health of one endpoint, as exported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointHealth {
    pub status: HealthState,
    pub consecutive_failures: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    pub server_version: Option<String>,
    pub last_error: Option<String>,
}

/// Tracks consecutive connection results for a single endpoint.
#[derive(Debug)]
pub struct HealthTracker {
    status: HealthState,
    consecutive_failures: u32,
    /// Failures before the endpoint is marked unhealthy.
    unhealthy_threshold: u32,
    current_backoff: Duration,
    base_interval: Duration,
    max_backoff: Duration,
    next_check: Option<Instant>,
    last_check: Option<DateTime<Utc>>,
    latency_ms: Option<u64>,
    server_version: Option<String>,
    last_error: Option<String>,
}

impl HealthTracker {
    pub fn new(unhealthy_threshold: u32, interval: Duration, max_backoff: Duration) -> Self {
        Self {
            status: HealthState::Unknown,
            consecutive_failures: 0,
            unhealthy_threshold: unhealthy_threshold.max(1),
            current_backoff: interval,
            base_interval: interval,
            max_backoff,
            next_check: None,
            last_check: None,
            latency_ms: None,
            server_version: None,
            last_error: None,
        }
    }

    /// Record a successful connection.
    pub fn record_success(
        &mut self,
        latency: Option<Duration>,
        server_version: Option<String>,
    ) -> HealthState {
        self.consecutive_failures = 0;
        self.current_backoff = self.base_interval;
        self.last_error = None;
        self.last_check = Some(Utc::now());
        self.next_check = Some(Instant::now() + self.base_interval);
        if let Some(latency) = latency {
            self.latency_ms = Some(latency.as_millis() as u64);
        }
        if server_version.is_some() {
            self.server_version = server_version;
        }
        if self.status == HealthState::Unhealthy {
            debug!("endpoint recovered to healthy");
        }
        self.status = HealthState::Healthy;
        self.status
    }

    /// Record a failed connection or health check.
    pub fn record_failure(&mut self, error: &str) -> HealthState {
        self.consecutive_failures += 1;
        self.last_error = Some(error.to_string());
        self.last_check = Some(Utc::now());

        // Exponential backoff: double the interval up to max.
        self.current_backoff = (self.current_backoff * 2).min(self.max_backoff);
        self.next_check = Some(Instant::now() + self.current_backoff);

        if self.consecutive_failures >= self.unhealthy_threshold {
            if self.status != HealthState::Unhealthy {
                warn!(
                    failures = self.consecutive_failures,
                    threshold = self.unhealthy_threshold,
                    error,
                    "endpoint marked unhealthy"
                );
            }
            self.status = HealthState::Unhealthy;
        }
        self.status
    }

    pub fn status(&self) -> HealthState {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Current backoff interval before the next check.
    pub fn next_interval(&self) -> Duration {
        self.current_backoff
    }

    /// Whether a maintenance pass should probe this endpoint now.
    pub fn check_due(&self, now: Instant) -> bool {
        self.next_check.is_none_or(|at| now >= at)
    }

    pub fn snapshot(&self) -> EndpointHealth {
        EndpointHealth {
            status: self.status,
            consecutive_failures: self.consecutive_failures,
            last_check: self.last_check,
            latency_ms: self.latency_ms,
            server_version: self.server_version.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(threshold: u32) -> HealthTracker {
        HealthTracker::new(threshold, Duration::from_secs(1), Duration::from_secs(60))
    }

    #[test]
    fn starts_unknown_and_due() {
        let t = tracker(1);
        assert_eq!(t.status(), HealthState::Unknown);
        assert!(t.check_due(Instant::now()));
    }

    #[test]
    fn single_failure_marks_unhealthy_at_threshold_one() {
        let mut t = tracker(1);
        assert_eq!(t.record_failure("connection refused"), HealthState::Unhealthy);
        assert_eq!(t.snapshot().last_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn threshold_delays_unhealthy() {
        let mut t = tracker(3);
        assert_eq!(t.record_success(None, None), HealthState::Healthy);
        assert_eq!(t.record_failure("x"), HealthState::Healthy);
        assert_eq!(t.record_failure("x"), HealthState::Healthy);
        assert_eq!(t.record_failure("x"), HealthState::Unhealthy);
        assert_eq!(t.consecutive_failures(), 3);
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let mut t = tracker(1);
        t.record_failure("x");
        assert_eq!(t.next_interval(), Duration::from_secs(2));
        t.record_failure("x");
        assert_eq!(t.next_interval(), Duration::from_secs(4));
        for _ in 0..10 {
            t.record_failure("x");
        }
        assert_eq!(t.next_interval(), Duration::from_secs(60));
        assert!(!t.check_due(Instant::now()));
    }

    #[test]
    fn success_resets() {
        let mut t = tracker(1);
        t.record_failure("x");
        t.record_failure("x");
        t.record_success(Some(Duration::from_millis(12)), Some("16.2".into()));
        let snap = t.snapshot();
        assert_eq!(snap.status, HealthState::Healthy);
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.latency_ms, Some(12));
        assert_eq!(snap.server_version.as_deref(), Some("16.2"));
        assert!(snap.last_error.is_none());
        assert_eq!(t.next_interval(), Duration::from_secs(1));
    }
}
