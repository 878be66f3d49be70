//! Threshold definitions: user input, validation, and the default set.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use replwatch_state::{AlertThreshold, AlertType, Comparison, MetricName, Severity};

use crate::error::{AlertError, AlertResult};

/// User-supplied threshold definition (create and replace).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub metric: MetricName,
    #[serde(default = "default_comparison")]
    pub comparison: Comparison,
    pub value: f64,
    #[serde(default)]
    pub scope: Option<Uuid>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_comparison() -> Comparison {
    Comparison::Gt
}

fn default_enabled() -> bool {
    true
}

impl ThresholdSpec {
    pub fn validate(&self) -> AlertResult<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AlertError::Validation("threshold name is required".into()));
        }
        if name.len() > 100 {
            return Err(AlertError::Validation(
                "threshold name must be at most 100 characters".into(),
            ));
        }
        if !self.value.is_finite() {
            return Err(AlertError::Validation(format!(
                "threshold value must be a finite number, got {}",
                self.value
            )));
        }
        if self.metric == MetricName::WalRetentionRatio && !(0.0..=1.0).contains(&self.value) {
            return Err(AlertError::Validation(
                "wal_retention_ratio thresholds must be between 0 and 1".into(),
            ));
        }
        Ok(())
    }

    pub fn into_threshold(self) -> AlertResult<AlertThreshold> {
        self.validate()?;
        let now = Utc::now();
        Ok(AlertThreshold {
            id: Uuid::new_v4(),
            name: self.name.trim().to_string(),
            description: self.description,
            alert_type: self.alert_type,
            severity: self.severity,
            metric: self.metric,
            comparison: self.comparison,
            value: self.value,
            scope: self.scope,
            enabled: self.enabled,
            created_at: now,
            updated_at: now,
        })
    }

    /// Overwrite every user-editable field of `threshold`.
    pub fn apply_to(self, threshold: &mut AlertThreshold) -> AlertResult<()> {
        self.validate()?;
        threshold.name = self.name.trim().to_string();
        threshold.description = self.description;
        threshold.alert_type = self.alert_type;
        threshold.severity = self.severity;
        threshold.metric = self.metric;
        threshold.comparison = self.comparison;
        threshold.value = self.value;
        threshold.scope = self.scope;
        threshold.enabled = self.enabled;
        threshold.updated_at = Utc::now();
        Ok(())
    }
}

fn default(
    name: &str,
    description: &str,
    alert_type: AlertType,
    severity: Severity,
    metric: MetricName,
    comparison: Comparison,
    value: f64,
) -> ThresholdSpec {
    ThresholdSpec {
        name: name.into(),
        description: Some(description.into()),
        alert_type,
        severity,
        metric,
        comparison,
        value,
        scope: None,
        enabled: true,
    }
}

/// Thresholds installed when the store has none.
pub fn default_thresholds() -> Vec<ThresholdSpec> {
    vec![
        default(
            "Replication Lag Warning",
            "Replication lag exceeds 5 minutes",
            AlertType::ReplicationLag,
            Severity::Warning,
            MetricName::ReplicationLagSeconds,
            Comparison::Gt,
            300.0,
        ),
        default(
            "Replication Lag Critical",
            "Replication lag exceeds 30 minutes",
            AlertType::ReplicationLag,
            Severity::Critical,
            MetricName::ReplicationLagSeconds,
            Comparison::Gt,
            1800.0,
        ),
        default(
            "Database Connection Failure",
            "Database health check failed",
            AlertType::DatabaseConnection,
            Severity::Critical,
            MetricName::DatabaseConnectionFailed,
            Comparison::Gte,
            1.0,
        ),
        default(
            "Long Running Queries Detected",
            "Queries running longer than the long-running query limit",
            AlertType::LongRunningQuery,
            Severity::Warning,
            MetricName::LongRunningQueryCount,
            Comparison::Gte,
            1.0,
        ),
        default(
            "Very Long Running Query",
            "A query has been running for more than 5 minutes",
            AlertType::LongRunningQuery,
            Severity::Critical,
            MetricName::LongRunningQueryMaxDuration,
            Comparison::Gte,
            300.0,
        ),
        default(
            "WAL Retention High",
            "Replication slots retain more than 80% of the WAL budget",
            AlertType::WalRetention,
            Severity::Warning,
            MetricName::WalRetentionRatio,
            Comparison::Gte,
            0.8,
        ),
    ]
}
