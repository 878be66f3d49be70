//! Creating, deleting and pre-checking logical streams.
//!
//! The only operations in this crate that change a monitored server.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use replwatch_pg::{QueryError, Session};
use replwatch_state::{
    DatabaseEndpoint, ReplicationMetricSample, ReplicationStream, StreamKind, StreamStatus,
    stream_identity, validate_identifier,
};

use crate::engine::DiscoveryEngine;
use crate::error::{
    DiscoveryError, DiscoveryResult, ReplicationSetupError, RollbackReport, SetupStep,
};

/// Oldest server major version with logical replication.
const MIN_LOGICAL_VERSION: u32 = 10;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    #[default]
    Logical,
    Physical,
}

fn default_copy_data() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateStreamRequest {
    pub source_id: Uuid,
    pub target_id: Uuid,
    #[serde(rename = "type", default)]
    pub stream_type: StreamType,
    pub publication_name: String,
    pub subscription_name: String,
    /// Publish only these tables; `None` publishes all tables.
    #[serde(default)]
    pub tables: Option<Vec<String>>,
    /// Copy existing rows before streaming changes.
    #[serde(default = "default_copy_data")]
    pub copy_data: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamRemoval {
    pub stream_id: Uuid,
    pub subscription_dropped: bool,
    /// False when another stream still uses the publication, or the
    /// publisher could not be reached.
    pub publication_dropped: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamValidation {
    pub valid: bool,
    pub checks: Vec<ValidationCheck>,
}

impl StreamValidation {
    fn check(&mut self, name: &str, passed: bool, message: impl Into<String>) {
        self.valid &= passed;
        self.checks.push(ValidationCheck {
            name: name.to_string(),
            passed,
            message: message.into(),
        });
    }
}

/// Leading major version of a `server_version` string like `16.2 (Debian)`.
fn major_version(version: &str) -> Option<u32> {
    let digits: String = version.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn query_failed(endpoint: &DatabaseEndpoint) -> impl Fn(QueryError) -> DiscoveryError + '_ {
    move |e| DiscoveryError::Query {
        endpoint: endpoint.name.clone(),
        message: e.to_string(),
    }
}

fn invalid(e: impl ToString) -> DiscoveryError {
    DiscoveryError::Validation(e.to_string())
}

impl DiscoveryEngine {
    /// Create a logical stream: publication on the source (reused when it
    /// already exists), subscription on the target.
    ///
    /// On failure after a server change, the subscription and any
    /// publication created here are dropped again and nothing is stored.
    pub async fn create_stream(
        &self,
        request: CreateStreamRequest,
    ) -> DiscoveryResult<ReplicationStream> {
        if request.stream_type == StreamType::Physical {
            return Err(DiscoveryError::Validation(
                "physical streams are monitor-only and cannot be created".into(),
            ));
        }
        validate_identifier("publication", &request.publication_name).map_err(invalid)?;
        validate_identifier("subscription", &request.subscription_name).map_err(invalid)?;
        if request.source_id == request.target_id {
            return Err(invalid("source and target must be different databases"));
        }
        if let Some(tables) = &request.tables {
            if tables.iter().any(|t| t.trim().is_empty()) {
                return Err(invalid("table names must not be empty"));
            }
        }

        // A scan between CREATE SUBSCRIPTION and the store write would
        // record the same stream a second time.
        let _scan = self.scan_lock.lock().await;
        let source = self.endpoint(request.source_id)?;
        let target = self.endpoint(request.target_id)?;
        let kind = StreamKind::Logical {
            publication: request.publication_name.clone(),
            subscription: request.subscription_name.clone(),
        };
        let identity = stream_identity(source.id, target.id, &kind);
        let known: Vec<ReplicationStream> = self.store.list()?;
        if known.iter().any(|s| s.identity() == identity) {
            return Err(DiscoveryError::Conflict(format!(
                "stream {} -> {} via subscription {} already exists",
                source.name, target.name, request.subscription_name
            )));
        }

        let mut src = self.connect(&source).await?;
        let mut dst = self.connect(&target).await?;

        let subscriptions = dst.subscriptions().await.map_err(query_failed(&target))?;
        if subscriptions
            .iter()
            .any(|s| s.name == request.subscription_name)
        {
            return Err(DiscoveryError::Conflict(format!(
                "subscription {} already exists on {}",
                request.subscription_name, target.name
            )));
        }
        let publication_exists = src
            .publications()
            .await
            .map_err(query_failed(&source))?
            .iter()
            .any(|p| p.name == request.publication_name);

        let publication = request.publication_name.as_str();
        let subscription = request.subscription_name.as_str();

        if publication_exists {
            info!(source = %source.name, publication, "reusing existing publication");
        } else if let Err(e) = src
            .create_publication(publication, request.tables.as_deref())
            .await
        {
            return Err(ReplicationSetupError {
                step: SetupStep::CreatePublication,
                cause: e.to_string(),
                rollback: RollbackReport::default(),
            }
            .into());
        }
        let created_publication = (!publication_exists).then_some(publication);

        let conninfo = match self.connections.connection_string(&source).await {
            Ok(conninfo) => conninfo,
            Err(e) => {
                return Err(roll_back(
                    SetupStep::ResolveConnection,
                    e.to_string(),
                    &mut *src,
                    None,
                    created_publication,
                )
                .await);
            }
        };

        if let Err(e) = dst
            .create_subscription(subscription, &conninfo, publication, request.copy_data)
            .await
        {
            return Err(roll_back(
                SetupStep::CreateSubscription,
                e.to_string(),
                &mut *src,
                Some((&mut *dst, subscription)),
                created_publication,
            )
            .await);
        }

        let now = Utc::now();
        let stream = ReplicationStream {
            id: Uuid::new_v4(),
            source_id: source.id,
            target_id: target.id,
            kind,
            status: if request.copy_data {
                StreamStatus::Syncing
            } else {
                StreamStatus::Active
            },
            lag_bytes: None,
            lag_seconds: None,
            last_sync_at: None,
            error_message: None,
            manageable: true,
            external_target: None,
            missed_scans: 0,
            created_at: now,
            updated_at: now,
            last_seen_at: now,
        };
        if let Err(e) = self.store.put(&stream) {
            return Err(roll_back(
                SetupStep::Persist,
                e.to_string(),
                &mut *src,
                Some((&mut *dst, subscription)),
                created_publication,
            )
            .await);
        }

        info!(
            stream_id = %stream.id,
            source = %source.name,
            target = %target.name,
            publication,
            subscription,
            "logical stream created"
        );
        Ok(stream)
    }

    /// Drop a manageable stream's subscription, and its publication when no
    /// other stream from the same source uses it.
    pub async fn delete_stream(&self, stream_id: Uuid) -> DiscoveryResult<StreamRemoval> {
        let _scan = self.scan_lock.lock().await;
        let stream: ReplicationStream =
            self.store
                .get(&stream_id.to_string())?
                .ok_or(DiscoveryError::NotFound {
                    kind: "stream",
                    id: stream_id,
                })?;
        let StreamKind::Logical {
            publication,
            subscription,
        } = &stream.kind
        else {
            return Err(DiscoveryError::NotManageable(stream_id));
        };
        if !stream.manageable {
            return Err(DiscoveryError::NotManageable(stream_id));
        }

        let target = self.endpoint(stream.target_id)?;
        {
            let mut dst = self.connect(&target).await?;
            dst.drop_subscription(subscription)
                .await
                .map_err(query_failed(&target))?;
        }

        let shared = self
            .store
            .list::<ReplicationStream>()?
            .iter()
            .any(|s| {
                s.id != stream_id
                    && s.source_id == stream.source_id
                    && matches!(&s.kind, StreamKind::Logical { publication: p, .. } if p == publication)
            });
        let publication_dropped = if shared {
            false
        } else {
            match self.drop_publication(stream.source_id, publication).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(%stream_id, %publication, error = %e, "publication left in place");
                    false
                }
            }
        };

        self.store.delete::<ReplicationStream>(&stream_id.to_string())?;
        self.store
            .delete_prefix::<ReplicationMetricSample>(&ReplicationMetricSample::stream_prefix(
                stream_id,
            ))?;
        info!(%stream_id, %subscription, publication_dropped, "logical stream deleted");
        Ok(StreamRemoval {
            stream_id,
            subscription_dropped: true,
            publication_dropped,
        })
    }

    /// Check whether a logical stream between two endpoints could be set up.
    /// Makes no changes.
    pub async fn validate_stream(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        tables: Option<Vec<String>>,
    ) -> DiscoveryResult<StreamValidation> {
        if source_id == target_id {
            return Err(invalid("source and target must be different databases"));
        }
        let source = self.endpoint(source_id)?;
        let target = self.endpoint(target_id)?;
        let mut report = StreamValidation {
            valid: true,
            checks: Vec::new(),
        };

        match self.connect(&source).await {
            Ok(mut session) => {
                report.check("source_connectivity", true, format!("connected to {}", source.name));
                check_server(&mut report, "source", &mut *session).await;
                if let Some(tables) = tables.as_deref().filter(|t| !t.is_empty()) {
                    match session.missing_tables(tables).await {
                        Ok(missing) if missing.is_empty() => {
                            report.check("tables", true, "all tables exist on the source");
                        }
                        Ok(missing) => report.check(
                            "tables",
                            false,
                            format!("missing on source: {}", missing.join(", ")),
                        ),
                        Err(e) => report.check("tables", false, e.to_string()),
                    }
                }
            }
            Err(e) => report.check("source_connectivity", false, e.to_string()),
        }

        match self.connect(&target).await {
            Ok(mut session) => {
                report.check("target_connectivity", true, format!("connected to {}", target.name));
                check_server(&mut report, "target", &mut *session).await;
            }
            Err(e) => report.check("target_connectivity", false, e.to_string()),
        }
        Ok(report)
    }

    async fn drop_publication(&self, source_id: Uuid, publication: &str) -> DiscoveryResult<()> {
        let source = self.endpoint(source_id)?;
        let mut src = self.connect(&source).await?;
        src.drop_publication(publication)
            .await
            .map_err(query_failed(&source))
    }
}

async fn check_server(report: &mut StreamValidation, side: &str, session: &mut dyn Session) {
    match session.server_version().await {
        Ok(version) => {
            let supported = major_version(&version).is_some_and(|v| v >= MIN_LOGICAL_VERSION);
            let message = if supported {
                format!("PostgreSQL {version}")
            } else {
                format!("PostgreSQL {version} lacks logical replication")
            };
            report.check(&format!("{side}_version"), supported, message);
        }
        Err(e) => report.check(&format!("{side}_version"), false, e.to_string()),
    }
    match session.has_replication_privilege().await {
        Ok(true) => report.check(
            &format!("{side}_privileges"),
            true,
            "user may manage replication",
        ),
        Ok(false) => report.check(
            &format!("{side}_privileges"),
            false,
            "user lacks the REPLICATION attribute",
        ),
        Err(e) => report.check(&format!("{side}_privileges"), false, e.to_string()),
    }
}

/// Undo a partial setup. Drop errors are collected, never raised.
async fn roll_back(
    step: SetupStep,
    cause: String,
    source: &mut dyn Session,
    subscription: Option<(&mut dyn Session, &str)>,
    publication: Option<&str>,
) -> DiscoveryError {
    let mut rollback = RollbackReport::default();
    if let Some((target, name)) = subscription {
        match target.drop_subscription(name).await {
            Ok(()) => rollback.completed.push(format!("dropped subscription {name}")),
            Err(e) => rollback.failed.push(format!("drop subscription {name}: {e}")),
        }
    }
    if let Some(name) = publication {
        match source.drop_publication(name).await {
            Ok(()) => rollback.completed.push(format!("dropped publication {name}")),
            Err(e) => rollback.failed.push(format!("drop publication {name}: {e}")),
        }
    }
    warn!(%step, cause = %cause, rollback = %rollback, "stream setup failed, rolled back");
    ReplicationSetupError {
        step,
        cause,
        rollback,
    }
    .into()
}
