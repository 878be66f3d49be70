//! MigrationExecutor — runs one script against a set of databases.
//!
//! Targets run one after another. Each database gets the whole script in
//! a single transaction; a failure rolls that database back. With
//! `rollback_on_error` the remaining databases are skipped.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use replwatch_pg::ConnectionManager;
use replwatch_state::{
    DatabaseEndpoint, MigrationExecution, MigrationOptions, MigrationResult as TargetResult,
    MigrationStatus, Preflight, StateStore, TargetStatus,
};

use crate::error::{MigrateResult, MigrationError};
use crate::lease::{LeaseGuard, LeaseTable};
use crate::split::{preflight_warnings, split_statements};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MigrationsConfig {
    pub max_targets: usize,
    pub max_script_bytes: usize,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            max_targets: 100,
            max_script_bytes: 1 << 20,
        }
    }
}

fn sequential() -> String {
    "sequential".to_string()
}

/// A migration submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MigrationRequest {
    pub sql_script: String,
    /// `None` targets every configured database.
    #[serde(default)]
    pub target_databases: Option<Vec<Uuid>>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_rollback")]
    pub rollback_on_error: bool,
    /// Only `sequential` is supported.
    #[serde(default = "sequential")]
    pub execution_order: String,
    #[serde(default)]
    pub initiated_by: Option<String>,
}

fn default_rollback() -> bool {
    true
}

impl MigrationRequest {
    pub fn options(&self) -> MigrationOptions {
        MigrationOptions {
            dry_run: self.dry_run,
            rollback_on_error: self.rollback_on_error,
        }
    }
}

/// A validated request with its leases held.
struct Prepared {
    execution: MigrationExecution,
    endpoints: Vec<DatabaseEndpoint>,
    _leases: LeaseGuard,
}

pub struct MigrationExecutor {
    store: StateStore,
    connections: Arc<ConnectionManager>,
    config: MigrationsConfig,
    leases: Arc<LeaseTable>,
    cancelled: Mutex<HashSet<Uuid>>,
}

impl MigrationExecutor {
    pub fn new(
        store: StateStore,
        connections: Arc<ConnectionManager>,
        config: MigrationsConfig,
    ) -> Self {
        Self {
            store,
            connections,
            config,
            leases: LeaseTable::new(),
            cancelled: Mutex::new(HashSet::new()),
        }
    }

    /// Static checks only: nothing is leased, persisted or sent.
    pub fn validate(&self, script: &str, targets: Option<&[Uuid]>) -> MigrateResult<Preflight> {
        let (preflight, _) = self.check(script, targets, "sequential")?;
        Ok(preflight)
    }

    /// Run a migration to completion.
    ///
    /// A dry run records a `validated` result per target without touching
    /// any database.
    pub async fn execute(&self, request: MigrationRequest) -> MigrateResult<MigrationExecution> {
        if request.dry_run {
            return self.dry_run(request);
        }
        let prepared = self.prepare(request)?;
        Ok(self.run(prepared).await)
    }

    /// Validate, lease and persist the execution, then run it in the
    /// background. Returns the `running` record.
    pub fn start(self: &Arc<Self>, request: MigrationRequest) -> MigrateResult<MigrationExecution> {
        if request.dry_run {
            return self.dry_run(request);
        }
        let prepared = self.prepare(request)?;
        let running = prepared.execution.clone();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(prepared).await;
        });
        Ok(running)
    }

    /// Stop a running migration before its next database.
    pub fn cancel(&self, id: Uuid) -> MigrateResult<MigrationExecution> {
        let execution = self.get(id)?;
        if execution.status.is_terminal() {
            return Err(MigrationError::Finished {
                id,
                status: execution.status,
            });
        }
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        info!(execution_id = %id, "migration cancellation requested");
        Ok(execution)
    }

    pub fn get(&self, id: Uuid) -> MigrateResult<MigrationExecution> {
        self.store
            .get(&id.to_string())?
            .ok_or(MigrationError::NotFound(id))
    }

    /// Newest first.
    pub fn history(&self, limit: usize, offset: usize) -> MigrateResult<Vec<MigrationExecution>> {
        let mut all: Vec<MigrationExecution> = self.store.list()?;
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }

    /// Mark executions left running by a previous process as failed.
    pub fn recover_interrupted(&self) -> MigrateResult<usize> {
        let mut recovered = 0;
        for execution in self.store.list::<MigrationExecution>()? {
            if execution.status.is_terminal() {
                continue;
            }
            let now = Utc::now();
            self.store
                .update::<MigrationExecution, _>(&execution.id.to_string(), |e| {
                    if e.status.is_terminal() {
                        return false;
                    }
                    e.status = MigrationStatus::Failed;
                    e.halted = true;
                    e.completed_at = Some(now);
                    for db in &e.targets {
                        if !e.results.iter().any(|r| r.database_id == *db) {
                            e.results.push(TargetResult {
                                database_id: *db,
                                database_name: db.to_string(),
                                status: TargetStatus::Skipped,
                                execution_time_ms: None,
                                rows_affected: None,
                                error_message: Some("interrupted by restart".into()),
                            });
                        }
                    }
                    true
                })?;
            warn!(execution_id = %execution.id, "interrupted migration marked failed");
            recovered += 1;
        }
        Ok(recovered)
    }

    // ── Preparation ────────────────────────────────────────────────

    fn check(
        &self,
        script: &str,
        targets: Option<&[Uuid]>,
        order: &str,
    ) -> MigrateResult<(Preflight, Vec<DatabaseEndpoint>)> {
        if order != "sequential" {
            return Err(MigrationError::Validation(format!(
                "execution order '{order}' is not supported, use 'sequential'"
            )));
        }
        if script.trim().is_empty() {
            return Err(MigrationError::Validation("sql_script is empty".into()));
        }
        if script.len() > self.config.max_script_bytes {
            return Err(MigrationError::Validation(format!(
                "sql_script exceeds {} bytes",
                self.config.max_script_bytes
            )));
        }
        let statements = split_statements(script);
        if statements.is_empty() {
            return Err(MigrationError::Validation(
                "sql_script contains no statements".into(),
            ));
        }
        let endpoints = match targets {
            Some(targets) => self.explicit_targets(targets)?,
            None => {
                let all: Vec<DatabaseEndpoint> = self.store.list()?;
                if all.is_empty() {
                    return Err(MigrationError::Validation(
                        "no databases are configured".into(),
                    ));
                }
                all
            }
        };
        if endpoints.len() > self.config.max_targets {
            return Err(MigrationError::Validation(format!(
                "at most {} target databases per migration",
                self.config.max_targets
            )));
        }

        let preflight = Preflight {
            statement_count: statements.len(),
            target_count: endpoints.len(),
            warnings: preflight_warnings(&statements),
        };
        Ok((preflight, endpoints))
    }

    fn explicit_targets(&self, targets: &[Uuid]) -> MigrateResult<Vec<DatabaseEndpoint>> {
        if targets.is_empty() {
            return Err(MigrationError::Validation(
                "target_databases is empty".into(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = targets.iter().find(|id| !seen.insert(**id)) {
            return Err(MigrationError::Validation(format!(
                "database {dup} is listed more than once"
            )));
        }

        let mut endpoints = Vec::with_capacity(targets.len());
        for id in targets {
            let endpoint: DatabaseEndpoint = self
                .store
                .get(&id.to_string())?
                .ok_or_else(|| MigrationError::Validation(format!("database {id} not found")))?;
            endpoints.push(endpoint);
        }
        Ok(endpoints)
    }

    fn new_execution(
        request: &MigrationRequest,
        preflight: Preflight,
        endpoints: &[DatabaseEndpoint],
    ) -> MigrationExecution {
        MigrationExecution {
            id: Uuid::new_v4(),
            script: request.sql_script.clone(),
            targets: endpoints.iter().map(|e| e.id).collect(),
            options: request.options(),
            preflight,
            status: MigrationStatus::Pending,
            results: Vec::new(),
            halted: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            initiated_by: request.initiated_by.clone(),
        }
    }

    fn dry_run(&self, request: MigrationRequest) -> MigrateResult<MigrationExecution> {
        let (preflight, endpoints) = self.check(
            &request.sql_script,
            request.target_databases.as_deref(),
            &request.execution_order,
        )?;
        let mut execution = Self::new_execution(&request, preflight, &endpoints);
        let now = Utc::now();
        execution.status = MigrationStatus::Completed;
        execution.started_at = Some(now);
        execution.completed_at = Some(now);
        execution.results = endpoints
            .iter()
            .map(|e| TargetResult {
                database_id: e.id,
                database_name: e.name.clone(),
                status: TargetStatus::Validated,
                execution_time_ms: Some(0),
                rows_affected: None,
                error_message: None,
            })
            .collect();
        self.store.put(&execution)?;
        info!(
            execution_id = %execution.id,
            statements = execution.preflight.statement_count,
            targets = execution.targets.len(),
            "migration dry run"
        );
        Ok(execution)
    }

    fn prepare(&self, request: MigrationRequest) -> MigrateResult<Prepared> {
        let (preflight, endpoints) = self.check(
            &request.sql_script,
            request.target_databases.as_deref(),
            &request.execution_order,
        )?;
        let mut execution = Self::new_execution(&request, preflight, &endpoints);

        let leases = self
            .leases
            .acquire(execution.id, &execution.targets)
            .map_err(|(database_id, holder)| {
                let database = endpoints
                    .iter()
                    .find(|e| e.id == database_id)
                    .map(|e| e.name.clone())
                    .unwrap_or_else(|| database_id.to_string());
                warn!(%database_id, %holder, "migration rejected, database busy");
                MigrationError::Conflict {
                    database,
                    database_id,
                    execution_id: holder,
                }
            })?;

        execution.status = MigrationStatus::Running;
        execution.started_at = Some(Utc::now());
        self.store.put(&execution)?;
        info!(
            execution_id = %execution.id,
            targets = execution.targets.len(),
            statements = execution.preflight.statement_count,
            warnings = execution.preflight.warnings.len(),
            "migration started"
        );
        Ok(Prepared {
            execution,
            endpoints,
            _leases: leases,
        })
    }

    // ── Execution ──────────────────────────────────────────────────

    async fn run(&self, prepared: Prepared) -> MigrationExecution {
        let Prepared {
            mut execution,
            endpoints,
            _leases,
        } = prepared;
        let id = execution.id;
        let mut stop_reason: Option<&'static str> = None;

        for endpoint in &endpoints {
            if stop_reason.is_none() && self.is_cancelled(id) {
                stop_reason = Some("not attempted: migration cancelled");
            }
            let result = match stop_reason {
                Some(reason) => TargetResult {
                    database_id: endpoint.id,
                    database_name: endpoint.name.clone(),
                    status: TargetStatus::Skipped,
                    execution_time_ms: None,
                    rows_affected: None,
                    error_message: Some(reason.to_string()),
                },
                None => self.run_target(&execution, endpoint).await,
            };
            if result.status == TargetStatus::Failed && execution.options.rollback_on_error {
                stop_reason = Some("not attempted: an earlier database failed");
            }
            execution.results.push(result);
            self.save_progress(&execution);
        }

        execution.halted = stop_reason.is_some();
        execution.status = if execution
            .results
            .iter()
            .all(|r| r.status == TargetStatus::Success)
        {
            MigrationStatus::Completed
        } else {
            MigrationStatus::Failed
        };
        execution.completed_at = Some(Utc::now());
        self.save_progress(&execution);
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);

        let succeeded = execution
            .results
            .iter()
            .filter(|r| r.status == TargetStatus::Success)
            .count();
        info!(
            execution_id = %id,
            status = ?execution.status,
            succeeded,
            targets = execution.results.len(),
            halted = execution.halted,
            "migration finished"
        );
        execution
    }

    async fn run_target(
        &self,
        execution: &MigrationExecution,
        endpoint: &DatabaseEndpoint,
    ) -> TargetResult {
        let started = Instant::now();
        let outcome = match self.connections.acquire(endpoint).await {
            Ok(mut session) => session
                .execute_in_transaction(&execution.script)
                .await
                .map_err(|e| format!("rolled back: {e}")),
            Err(e) => Err(e.to_string()),
        };
        let elapsed = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(rows) => {
                info!(execution_id = %execution.id, endpoint_id = %endpoint.id, rows, elapsed_ms = elapsed, "migration committed");
                TargetResult {
                    database_id: endpoint.id,
                    database_name: endpoint.name.clone(),
                    status: TargetStatus::Success,
                    execution_time_ms: Some(elapsed),
                    rows_affected: Some(rows),
                    error_message: None,
                }
            }
            Err(message) => {
                error!(execution_id = %execution.id, endpoint_id = %endpoint.id, error = %message, "migration failed");
                TargetResult {
                    database_id: endpoint.id,
                    database_name: endpoint.name.clone(),
                    status: TargetStatus::Failed,
                    execution_time_ms: Some(elapsed),
                    rows_affected: None,
                    error_message: Some(message),
                }
            }
        }
    }

    fn is_cancelled(&self, id: Uuid) -> bool {
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    /// Overwrite the stored record unless it is already terminal.
    fn save_progress(&self, execution: &MigrationExecution) {
        let result = self
            .store
            .update::<MigrationExecution, _>(&execution.id.to_string(), |stored| {
                if stored.status.is_terminal() {
                    return false;
                }
                *stored = execution.clone();
                true
            });
        if let Err(e) = result {
            error!(execution_id = %execution.id, error = %e, "failed to persist migration progress");
        }
    }
}
