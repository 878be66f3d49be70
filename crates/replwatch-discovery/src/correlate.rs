//! Correlation of per-endpoint catalog snapshots into replication streams.
//!
//! Pure: takes what every reachable endpoint reported and the configured
//! endpoint set, returns the streams those reports imply plus any
//! configured roles they contradict. Nothing here touches the store.

use std::collections::{HashMap, HashSet};

use tracing::debug;
use uuid::Uuid;

use replwatch_pg::conninfo::ConnInfo;
use replwatch_pg::{PublicationInfo, StandbyStatus, SubscriptionInfo, WalSenderInfo};
use replwatch_state::{
    DatabaseEndpoint, DatabaseRole, ExternalTarget, Lsn, RoleInconsistency, StreamKind,
    StreamStatus, Timestamp, stream_identity,
};

/// Everything one endpoint reported during a scan.
#[derive(Debug, Clone, Default)]
pub struct EndpointSnapshot {
    pub endpoint_id: Uuid,
    pub server_version: String,
    pub current_lsn: Option<Lsn>,
    pub publications: Vec<PublicationInfo>,
    pub subscriptions: Vec<SubscriptionInfo>,
    pub wal_senders: Vec<WalSenderInfo>,
    pub standby: StandbyStatus,
}

impl EndpointSnapshot {
    pub fn publishes(&self, publication: &str) -> bool {
        self.publications.iter().any(|p| p.name == publication)
    }
}

/// A stream implied by one scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedStream {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub kind: StreamKind,
    pub status: StreamStatus,
    pub last_sync_at: Option<Timestamp>,
    pub external_target: Option<ExternalTarget>,
}

impl ObservedStream {
    pub fn identity(&self) -> String {
        stream_identity(self.source_id, self.target_id, &self.kind)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Correlation {
    pub streams: Vec<ObservedStream>,
    pub inconsistencies: Vec<RoleInconsistency>,
}

/// Normalize snapshots of the endpoints that answered this scan.
///
/// `endpoints` is the full configured set, including endpoints that did not
/// answer: a subscription may still be attributed to an unreachable
/// publisher through its connection string.
pub fn correlate(
    endpoints: &[DatabaseEndpoint],
    snapshots: &[EndpointSnapshot],
    now: Timestamp,
) -> Correlation {
    let by_id: HashMap<Uuid, &EndpointSnapshot> =
        snapshots.iter().map(|s| (s.endpoint_id, s)).collect();

    let mut seen = HashSet::new();
    let mut streams = Vec::new();
    let mut push = |stream: ObservedStream| {
        if seen.insert(stream.identity()) {
            streams.push(stream);
        }
    };

    for snapshot in snapshots {
        for subscription in &snapshot.subscriptions {
            match logical_stream(endpoints, &by_id, snapshot, subscription) {
                Some(stream) => push(stream),
                None => debug!(
                    target_id = %snapshot.endpoint_id,
                    subscription = %subscription.name,
                    "subscription publisher is not a configured endpoint"
                ),
            }
        }
    }

    for snapshot in snapshots {
        let Some(source) = endpoints.iter().find(|e| e.id == snapshot.endpoint_id) else {
            continue;
        };
        for stream in physical_streams(endpoints, snapshots, source, snapshot, now) {
            push(stream);
        }
    }

    let inconsistencies = role_inconsistencies(endpoints, snapshots, &streams);
    Correlation {
        streams,
        inconsistencies,
    }
}

// ── Logical ────────────────────────────────────────────────────────

fn logical_stream(
    endpoints: &[DatabaseEndpoint],
    by_id: &HashMap<Uuid, &EndpointSnapshot>,
    target: &EndpointSnapshot,
    subscription: &SubscriptionInfo,
) -> Option<ObservedStream> {
    let (source_id, publication) = resolve_publisher(endpoints, by_id, target, subscription)?;
    let status = if !subscription.enabled {
        StreamStatus::Inactive
    } else if subscription.is_backfilling() {
        StreamStatus::Syncing
    } else {
        StreamStatus::Active
    };
    Some(ObservedStream {
        source_id,
        target_id: target.endpoint_id,
        kind: StreamKind::Logical {
            publication,
            subscription: subscription.name.clone(),
        },
        status,
        last_sync_at: subscription.latest_end_time,
        external_target: None,
    })
}

/// The connection string decides first; when it names no configured
/// endpoint that carries the publication, fall back to the unique
/// endpoint publishing that name.
fn resolve_publisher(
    endpoints: &[DatabaseEndpoint],
    by_id: &HashMap<Uuid, &EndpointSnapshot>,
    target: &EndpointSnapshot,
    subscription: &SubscriptionInfo,
) -> Option<(Uuid, String)> {
    let conninfo = ConnInfo::parse(&subscription.conninfo);
    for publication in &subscription.publications {
        let direct = endpoints.iter().find(|e| {
            e.id != target.endpoint_id
                && conninfo.points_at(e)
                && by_id.get(&e.id).is_none_or(|s| s.publishes(publication))
        });
        if let Some(source) = direct {
            return Some((source.id, publication.clone()));
        }
    }

    for publication in &subscription.publications {
        let publishers: Vec<Uuid> = by_id
            .values()
            .filter(|s| s.endpoint_id != target.endpoint_id && s.publishes(publication))
            .map(|s| s.endpoint_id)
            .collect();
        if let [only] = publishers.as_slice() {
            return Some((*only, publication.clone()));
        }
    }
    None
}

// ── Physical ───────────────────────────────────────────────────────

fn streams_from(standby: &StandbyStatus, source: &DatabaseEndpoint) -> bool {
    standby.in_recovery
        && standby
            .sender_host
            .as_deref()
            .is_some_and(|h| h.eq_ignore_ascii_case(&source.host))
        && standby.sender_port.unwrap_or(5432) == i32::from(source.port)
}

fn physical_streams(
    endpoints: &[DatabaseEndpoint],
    snapshots: &[EndpointSnapshot],
    source: &DatabaseEndpoint,
    snapshot: &EndpointSnapshot,
    now: Timestamp,
) -> Vec<ObservedStream> {
    let standbys: Vec<&DatabaseEndpoint> = snapshots
        .iter()
        .filter(|s| s.endpoint_id != source.id && streams_from(&s.standby, source))
        .filter_map(|s| endpoints.iter().find(|e| e.id == s.endpoint_id))
        .collect();

    let mut claimed: HashSet<Uuid> = HashSet::new();
    let mut out = Vec::new();
    for sender in snapshot.wal_senders.iter().filter(|s| !s.is_logical()) {
        let client = sender.client_addr.as_deref();
        let host_is =
            |e: &DatabaseEndpoint| client.is_some_and(|a| e.host.eq_ignore_ascii_case(a));

        let matched = standbys
            .iter()
            .copied()
            .filter(|e| !claimed.contains(&e.id))
            .find(|e| host_is(e))
            .or_else(|| {
                endpoints
                    .iter()
                    .filter(|e| e.id != source.id && !claimed.contains(&e.id))
                    .find(|e| host_is(e))
            })
            .or_else(|| {
                let free: Vec<&DatabaseEndpoint> = standbys
                    .iter()
                    .copied()
                    .filter(|e| !claimed.contains(&e.id))
                    .collect();
                match free.as_slice() {
                    [only] => Some(*only),
                    _ => None,
                }
            })
            .map(|e| e.id);

        let (target_id, external_target) = match matched {
            Some(id) => {
                claimed.insert(id);
                (id, None)
            }
            None => {
                let external = ExternalTarget {
                    address: client.unwrap_or("local").to_string(),
                    application_name: sender.application_name.clone(),
                };
                (external.placeholder_id(), Some(external))
            }
        };

        let status = match sender.state.as_str() {
            "streaming" => StreamStatus::Active,
            "startup" | "catchup" | "backup" => StreamStatus::Syncing,
            _ => StreamStatus::Inactive,
        };
        out.push(ObservedStream {
            source_id: source.id,
            target_id,
            kind: StreamKind::Physical {
                application_name: sender.application_name.clone(),
                slot_name: sender.slot_name.clone(),
                sender_pid: Some(sender.pid),
                client_addr: sender.client_addr.clone(),
            },
            status,
            last_sync_at: sender.is_streaming().then_some(now),
            external_target,
        });
    }
    out
}

// ── Roles ──────────────────────────────────────────────────────────

fn role_inconsistencies(
    endpoints: &[DatabaseEndpoint],
    snapshots: &[EndpointSnapshot],
    streams: &[ObservedStream],
) -> Vec<RoleInconsistency> {
    let mut out = Vec::new();
    for snapshot in snapshots {
        let Some(endpoint) = endpoints.iter().find(|e| e.id == snapshot.endpoint_id) else {
            continue;
        };
        match endpoint.role {
            DatabaseRole::Primary if snapshot.standby.in_recovery => {
                out.push(RoleInconsistency {
                    endpoint_id: endpoint.id,
                    configured: endpoint.role,
                    observed: "in recovery (standby)".to_string(),
                });
            }
            DatabaseRole::Replica => {
                let is_target = streams.iter().any(|s| s.target_id == endpoint.id);
                let follows_configured = endpoints
                    .iter()
                    .any(|e| e.id != endpoint.id && streams_from(&snapshot.standby, e));
                if !is_target && !follows_configured {
                    out.push(RoleInconsistency {
                        endpoint_id: endpoint.id,
                        configured: endpoint.role,
                        observed: "not replicating from any configured endpoint".to_string(),
                    });
                }
            }
            DatabaseRole::Primary => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use replwatch_pg::testing::FakeDatabase;
    use replwatch_state::EndpointSpec;

    fn endpoint(name: &str, host: &str, role: DatabaseRole) -> DatabaseEndpoint {
        DatabaseEndpoint::create(EndpointSpec {
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
        .unwrap()
    }

    fn snapshot(id: Uuid) -> EndpointSnapshot {
        EndpointSnapshot {
            endpoint_id: id,
            server_version: "16.2".into(),
            ..Default::default()
        }
    }

    fn with_publication(mut s: EndpointSnapshot, name: &str) -> EndpointSnapshot {
        s.publications.push(PublicationInfo {
            name: name.into(),
            all_tables: true,
            table_count: 3,
        });
        s
    }

    fn standby_of(mut s: EndpointSnapshot, host: &str) -> EndpointSnapshot {
        s.standby = StandbyStatus {
            in_recovery: true,
            sender_host: Some(host.into()),
            sender_port: Some(5432),
            ..Default::default()
        };
        s
    }

    #[test]
    fn subscription_with_matching_conninfo_forms_logical_stream() {
        let source = endpoint("source", "src.internal", DatabaseRole::Primary);
        let target = endpoint("target", "dst.internal", DatabaseRole::Replica);
        let mut t = snapshot(target.id);
        t.subscriptions.push(FakeDatabase::subscription(
            "stream1",
            "host=src.internal port=5432 dbname=app user=repl",
            "stream1_pub",
        ));
        let s = with_publication(snapshot(source.id), "stream1_pub");

        let out = correlate(&[source.clone(), target.clone()], &[s, t], Utc::now());
        assert_eq!(out.streams.len(), 1);
        let stream = &out.streams[0];
        assert_eq!(stream.source_id, source.id);
        assert_eq!(stream.target_id, target.id);
        assert_eq!(stream.status, StreamStatus::Active);
        assert!(matches!(
            &stream.kind,
            StreamKind::Logical { publication, subscription }
                if publication == "stream1_pub" && subscription == "stream1"
        ));
        assert!(out.inconsistencies.is_empty());
    }

    #[test]
    fn unmatched_conninfo_falls_back_to_unique_publisher() {
        let source = endpoint("source", "src.internal", DatabaseRole::Primary);
        let target = endpoint("target", "dst.internal", DatabaseRole::Replica);
        let mut t = snapshot(target.id);
        t.subscriptions.push(FakeDatabase::subscription(
            "sub",
            "host=10.1.2.3 dbname=app",
            "orders_pub",
        ));
        let s = with_publication(snapshot(source.id), "orders_pub");

        let out = correlate(&[source.clone(), target], &[s, t], Utc::now());
        assert_eq!(out.streams.len(), 1);
        assert_eq!(out.streams[0].source_id, source.id);
    }

    #[test]
    fn ambiguous_publication_name_is_not_guessed() {
        let a = endpoint("a", "a.internal", DatabaseRole::Primary);
        let b = endpoint("b", "b.internal", DatabaseRole::Primary);
        let target = endpoint("target", "dst.internal", DatabaseRole::Replica);
        let mut t = snapshot(target.id);
        t.subscriptions.push(FakeDatabase::subscription(
            "sub",
            "host=10.1.2.3 dbname=app",
            "shared_pub",
        ));
        let snaps = [
            with_publication(snapshot(a.id), "shared_pub"),
            with_publication(snapshot(b.id), "shared_pub"),
            t,
        ];
        let out = correlate(&[a, b, target.clone()], &snaps, Utc::now());
        assert!(out.streams.is_empty());
        assert_eq!(out.inconsistencies.len(), 1);
        assert_eq!(out.inconsistencies[0].endpoint_id, target.id);
    }

    #[test]
    fn subscription_to_unreachable_publisher_matches_by_conninfo() {
        let source = endpoint("source", "src.internal", DatabaseRole::Primary);
        let target = endpoint("target", "dst.internal", DatabaseRole::Replica);
        let mut t = snapshot(target.id);
        t.subscriptions.push(FakeDatabase::subscription(
            "sub",
            "postgres://repl@src.internal:5432/app",
            "pub",
        ));
        let out = correlate(&[source.clone(), target], &[t], Utc::now());
        assert_eq!(out.streams.len(), 1);
        assert_eq!(out.streams[0].source_id, source.id);
    }

    #[test]
    fn backfilling_and_disabled_subscriptions() {
        let source = endpoint("source", "src.internal", DatabaseRole::Primary);
        let target = endpoint("target", "dst.internal", DatabaseRole::Replica);
        let mut syncing = FakeDatabase::subscription("a", "host=src.internal dbname=app", "p");
        syncing.synced_tables = 2;
        syncing.total_tables = 5;
        let mut disabled = FakeDatabase::subscription("b", "host=src.internal dbname=app", "p");
        disabled.enabled = false;
        let mut t = snapshot(target.id);
        t.subscriptions = vec![syncing, disabled];
        let s = with_publication(snapshot(source.id), "p");

        let out = correlate(&[source, target], &[s, t], Utc::now());
        let statuses: Vec<StreamStatus> = out.streams.iter().map(|s| s.status).collect();
        assert_eq!(statuses, vec![StreamStatus::Syncing, StreamStatus::Inactive]);
    }

    #[test]
    fn physical_sender_matched_by_client_address() {
        let primary = endpoint("primary", "10.0.0.1", DatabaseRole::Primary);
        let replica = endpoint("replica", "10.0.0.2", DatabaseRole::Replica);
        let mut p = snapshot(primary.id);
        p.wal_senders
            .push(FakeDatabase::wal_sender(101, "walreceiver", "10.0.0.2"));
        let r = standby_of(snapshot(replica.id), "10.0.0.1");

        let out = correlate(&[primary.clone(), replica.clone()], &[p, r], Utc::now());
        assert_eq!(out.streams.len(), 1);
        let stream = &out.streams[0];
        assert_eq!(stream.source_id, primary.id);
        assert_eq!(stream.target_id, replica.id);
        assert!(stream.external_target.is_none());
        assert_eq!(stream.status, StreamStatus::Active);
        assert!(out.inconsistencies.is_empty());
    }

    #[test]
    fn physical_sender_falls_back_to_unique_standby() {
        let primary = endpoint("primary", "pg-primary.internal", DatabaseRole::Primary);
        let replica = endpoint("replica", "pg-replica.internal", DatabaseRole::Replica);
        let mut p = snapshot(primary.id);
        // Client address is an IP, endpoints are configured by hostname.
        p.wal_senders
            .push(FakeDatabase::wal_sender(7, "walreceiver", "172.16.0.9"));
        let r = standby_of(snapshot(replica.id), "pg-primary.internal");

        let out = correlate(&[primary, replica.clone()], &[p, r], Utc::now());
        assert_eq!(out.streams[0].target_id, replica.id);
    }

    #[test]
    fn unknown_standby_gets_stable_placeholder() {
        let primary = endpoint("primary", "10.0.0.1", DatabaseRole::Primary);
        let mut p = snapshot(primary.id);
        p.wal_senders
            .push(FakeDatabase::wal_sender(7, "standby-dr", "192.168.9.9"));

        let first = correlate(&[primary.clone()], &[p.clone()], Utc::now());
        p.wal_senders[0].pid = 8;
        let second = correlate(&[primary], &[p], Utc::now());

        let stream = &first.streams[0];
        let external = stream.external_target.as_ref().unwrap();
        assert_eq!(external.address, "192.168.9.9");
        assert_eq!(stream.target_id, external.placeholder_id());
        assert_eq!(stream.identity(), second.streams[0].identity());
    }

    #[test]
    fn logical_slot_senders_are_skipped() {
        let primary = endpoint("primary", "10.0.0.1", DatabaseRole::Primary);
        let mut sender = FakeDatabase::wal_sender(9, "sub", "10.0.0.3");
        sender.slot_type = Some("logical".into());
        let mut p = snapshot(primary.id);
        p.wal_senders.push(sender);
        let out = correlate(&[primary], &[p], Utc::now());
        assert!(out.streams.is_empty());
    }

    #[test]
    fn primary_in_recovery_is_inconsistent() {
        let primary = endpoint("primary", "10.0.0.1", DatabaseRole::Primary);
        let other = endpoint("other", "10.0.0.9", DatabaseRole::Primary);
        let p = standby_of(snapshot(primary.id), "10.0.0.9");
        let out = correlate(&[primary.clone(), other], &[p], Utc::now());
        assert_eq!(out.inconsistencies.len(), 1);
        assert_eq!(out.inconsistencies[0].configured, DatabaseRole::Primary);
        assert_eq!(out.inconsistencies[0].endpoint_id, primary.id);
    }

    #[test]
    fn standby_of_unreachable_primary_is_consistent() {
        let primary = endpoint("primary", "10.0.0.1", DatabaseRole::Primary);
        let replica = endpoint("replica", "10.0.0.2", DatabaseRole::Replica);
        let r = standby_of(snapshot(replica.id), "10.0.0.1");
        let out = correlate(&[primary, replica], &[r], Utc::now());
        assert!(out.streams.is_empty());
        assert!(out.inconsistencies.is_empty());
    }
}
