//! Shared fixtures for handler tests.

use std::sync::Arc;

use replwatch_pg::testing::{FakeCluster, FakeDatabase};
use replwatch_scheduler::{AppContext, EngineConfig};
use replwatch_state::{DatabaseEndpoint, DatabaseRole, EndpointSpec, StateStore};

use crate::ApiState;

pub(crate) struct Harness {
    pub cluster: FakeCluster,
    pub state: ApiState,
}

impl Harness {
    pub fn new() -> Self {
        let store = StateStore::open_in_memory().unwrap();
        let cluster = FakeCluster::new();
        let ctx = AppContext::new(store, cluster.manager(), EngineConfig::default());
        Self {
            cluster,
            state: ApiState { ctx: Arc::new(ctx) },
        }
    }

    pub fn spec(name: &str, host: &str, role: DatabaseRole) -> EndpointSpec {
        EndpointSpec {
            name: name.into(),
            host: host.into(),
            port: 5432,
            database: "app".into(),
            role,
            environment: "test".into(),
            cloud_provider: "aws".into(),
            credential_ref: format!("secret/{name}"),
            use_iam_auth: false,
        }
    }

    /// Register an endpoint backed by `db` in the fake cluster.
    pub fn database(&self, name: &str, host: &str, db: FakeDatabase) -> DatabaseEndpoint {
        let endpoint = DatabaseEndpoint::create(Self::spec(name, host, DatabaseRole::Primary)).unwrap();
        self.state.ctx.store.put(&endpoint).unwrap();
        self.cluster.add(endpoint.id, db);
        endpoint
    }
}
