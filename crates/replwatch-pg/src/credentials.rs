//! Credential resolution.
//!
//! Endpoints carry an opaque secret reference; a [`CredentialProvider`]
//! turns it into a username/password pair at connection time. Resolved
//! credentials are cached for a bounded time so rotated secrets are picked
//! up without a restart.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::CredentialError;

/// Resolved secret for one endpoint.
#[derive(Clone, Deserialize, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "dbname")]
    pub database: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            host: None,
            port: None,
            database: None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .finish()
    }
}

/// Source of secrets, keyed by an endpoint's `credential_ref`.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn resolve(&self, reference: &str) -> Result<Credentials, CredentialError>;
}

/// Fixed map of references to credentials, typically from the config file.
#[derive(Default)]
pub struct StaticCredentialProvider {
    entries: HashMap<String, Credentials>,
}

impl StaticCredentialProvider {
    pub fn new(entries: HashMap<String, Credentials>) -> Self {
        Self { entries }
    }

    pub fn with(mut self, reference: impl Into<String>, credentials: Credentials) -> Self {
        self.entries.insert(reference.into(), credentials);
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn resolve(&self, reference: &str) -> Result<Credentials, CredentialError> {
        self.entries
            .get(reference)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound(reference.to_string()))
    }
}

/// Reads a JSON secret from an environment variable derived from the
/// reference: `prod/orders-db` → `REPLWATCH_SECRET_PROD_ORDERS_DB`.
#[derive(Debug, Default)]
pub struct EnvCredentialProvider {
    prefix: String,
}

impl EnvCredentialProvider {
    pub fn new() -> Self {
        Self {
            prefix: "REPLWATCH_SECRET_".to_string(),
        }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn variable_for(&self, reference: &str) -> String {
        let suffix: String = reference
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{suffix}", self.prefix)
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn resolve(&self, reference: &str) -> Result<Credentials, CredentialError> {
        let var = self.variable_for(reference);
        let raw =
            std::env::var(&var).map_err(|_| CredentialError::NotFound(reference.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| CredentialError::Malformed {
            reference: reference.to_string(),
            reason: e.to_string(),
        })
    }
}

/// TTL cache in front of a provider.
pub(crate) struct CredentialCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Credentials, Instant)>>,
}

impl CredentialCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn resolve(
        &self,
        provider: &dyn CredentialProvider,
        reference: &str,
    ) -> Result<Credentials, CredentialError> {
        {
            let entries = self.entries.lock().await;
            if let Some((credentials, fetched_at)) = entries.get(reference) {
                if fetched_at.elapsed() < self.ttl {
                    return Ok(credentials.clone());
                }
            }
        }
        let credentials = provider.resolve(reference).await?;
        debug!(%reference, "credentials resolved");
        self.entries
            .lock()
            .await
            .insert(reference.to_string(), (credentials.clone(), Instant::now()));
        Ok(credentials)
    }

    pub(crate) async fn invalidate(&self, reference: &str) {
        self.entries.lock().await.remove(reference);
    }
}
