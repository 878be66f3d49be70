//! System health summary.

use serde::{Deserialize, Serialize};

use replwatch_state::{Alert, AlertStatus, Severity, Timestamp};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemHealth {
    pub status: OverallStatus,
    pub active_alerts: usize,
    pub critical_alerts: usize,
    pub warning_alerts: usize,
    pub total_databases: usize,
    pub healthy_databases: usize,
    pub total_streams: usize,
    pub healthy_streams: usize,
    /// End of the most recent discovery scan.
    pub last_check: Option<Timestamp>,
    pub uptime_seconds: u64,
}

/// Inputs counted by the caller.
#[derive(Debug, Clone, Default)]
pub struct HealthCounts {
    pub total_databases: usize,
    pub healthy_databases: usize,
    pub total_streams: usize,
    pub healthy_streams: usize,
    pub last_check: Option<Timestamp>,
    pub uptime_seconds: u64,
}

/// Critical while any unacknowledged critical alert is active; degraded on
/// any active warning or unhealthy database.
pub fn summarize(alerts: &[Alert], counts: HealthCounts) -> SystemHealth {
    let active: Vec<&Alert> = alerts
        .iter()
        .filter(|a| a.status == AlertStatus::Active)
        .collect();
    let critical_alerts = active
        .iter()
        .filter(|a| a.severity == Severity::Critical)
        .count();
    let warning_alerts = active
        .iter()
        .filter(|a| a.severity == Severity::Warning)
        .count();

    let status = if critical_alerts > 0 {
        OverallStatus::Critical
    } else if warning_alerts > 0 || counts.healthy_databases < counts.total_databases {
        OverallStatus::Degraded
    } else {
        OverallStatus::Healthy
    };

    SystemHealth {
        status,
        active_alerts: active.len(),
        critical_alerts,
        warning_alerts,
        total_databases: counts.total_databases,
        healthy_databases: counts.healthy_databases,
        total_streams: counts.total_streams,
        healthy_streams: counts.healthy_streams,
        last_check: counts.last_check,
        uptime_seconds: counts.uptime_seconds,
    }
}
