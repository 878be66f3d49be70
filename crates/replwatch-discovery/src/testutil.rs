//! Shared fixtures for this crate's tests.

use std::sync::Arc;

use replwatch_pg::ConnectionManager;
use replwatch_pg::testing::{FakeCluster, FakeDatabase};
use replwatch_state::{DatabaseEndpoint, DatabaseRole, EndpointSpec, StateStore};

use crate::engine::{DiscoveryConfig, DiscoveryEngine};

pub(crate) struct Harness {
    pub store: StateStore,
    pub cluster: FakeCluster,
    pub connections: Arc<ConnectionManager>,
    pub engine: DiscoveryEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(DiscoveryConfig::default())
    }

    pub fn with_config(config: DiscoveryConfig) -> Self {
        let store = StateStore::open_in_memory().unwrap();
        let cluster = FakeCluster::new();
        let connections = cluster.manager();
        let engine = DiscoveryEngine::new(store.clone(), connections.clone(), config);
        Self {
            store,
            cluster,
            connections,
            engine,
        }
    }

    /// Register an endpoint in the store. The fake server is added separately.
    pub fn endpoint(&self, name: &str, host: &str, role: DatabaseRole) -> DatabaseEndpoint {
        let endpoint = DatabaseEndpoint::create(EndpointSpec {
            name: name.into(),
            host: host.into(),
            port: 5432,
            database: "app".into(),
            role,
            environment: "test".into(),
            cloud_provider: "aws".into(),
            credential_ref: format!("secret/{name}"),
            use_iam_auth: false,
        })
        .unwrap();
        self.store.put(&endpoint).unwrap();
        endpoint
    }

    /// A primary streaming WAL to one hot standby.
    pub fn physical_pair(&self) -> (DatabaseEndpoint, DatabaseEndpoint) {
        let primary = self.endpoint("primary", "10.0.0.1", DatabaseRole::Primary);
        let replica = self.endpoint("replica", "10.0.0.2", DatabaseRole::Replica);
        self.cluster.add(
            primary.id,
            FakeDatabase::primary().with_wal_sender(FakeDatabase::wal_sender(
                4242,
                "walreceiver",
                "10.0.0.2",
            )),
        );
        self.cluster
            .add(replica.id, FakeDatabase::standby("10.0.0.1", 5432));
        (primary, replica)
    }
}
