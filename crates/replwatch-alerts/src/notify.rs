//! Delivery of newly raised alerts.

use tracing::{error, info, warn};

use replwatch_state::{Alert, Severity};

/// Told about every alert the engine creates or escalates.
pub trait AlertNotifier: Send + Sync {
    fn notify(&self, alert: &Alert);
}

/// Writes alerts to the log at a level matching their severity.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl AlertNotifier for LogNotifier {
    fn notify(&self, alert: &Alert) {
        match alert.severity {
            Severity::Critical => error!(
                alert_id = %alert.id,
                target = %alert.target,
                title = %alert.title,
                "ALERT [CRITICAL] {}", alert.message
            ),
            Severity::Warning => warn!(
                alert_id = %alert.id,
                target = %alert.target,
                title = %alert.title,
                "ALERT [WARNING] {}", alert.message
            ),
            Severity::Info => info!(
                alert_id = %alert.id,
                target = %alert.target,
                title = %alert.title,
                "ALERT [INFO] {}", alert.message
            ),
        }
    }
}
