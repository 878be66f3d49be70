//! Folding one scan's observations into the stored stream set.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use replwatch_state::{ReplicationStream, StreamStatus, Timestamp};

use crate::correlate::ObservedStream;

/// Record changes one scan implies.
#[derive(Debug, Default)]
pub struct MergePlan {
    /// Created or changed streams, to be written.
    pub upserts: Vec<ReplicationStream>,
    /// Streams missed more than the allowed number of consecutive scans.
    pub removed: Vec<Uuid>,
    pub created: usize,
    pub refreshed: usize,
    pub marked_inactive: usize,
}

/// Match observations to stored streams by identity.
///
/// A matched stream keeps its id and its last lag figures. A stored stream
/// that was not observed counts a miss only when every endpoint that could
/// have reported it answered this scan; `scanned` holds those endpoints.
pub fn plan_merge(
    existing: Vec<ReplicationStream>,
    observed: &[ObservedStream],
    scanned: &HashSet<Uuid>,
    now: Timestamp,
    max_missed_scans: u32,
) -> MergePlan {
    let mut by_identity: HashMap<String, ReplicationStream> =
        existing.into_iter().map(|s| (s.identity(), s)).collect();
    let mut plan = MergePlan::default();

    for seen in observed {
        match by_identity.remove(&seen.identity()) {
            Some(mut stream) => {
                stream.kind = seen.kind.clone();
                stream.status = seen.status;
                if seen.last_sync_at.is_some() {
                    stream.last_sync_at = seen.last_sync_at;
                }
                stream.external_target = seen.external_target.clone();
                stream.error_message = None;
                stream.missed_scans = 0;
                stream.last_seen_at = now;
                stream.updated_at = now;
                plan.refreshed += 1;
                plan.upserts.push(stream);
            }
            None => {
                plan.created += 1;
                plan.upserts.push(ReplicationStream {
                    id: Uuid::new_v4(),
                    source_id: seen.source_id,
                    target_id: seen.target_id,
                    manageable: seen.kind.is_logical() && seen.external_target.is_none(),
                    kind: seen.kind.clone(),
                    status: seen.status,
                    lag_bytes: None,
                    lag_seconds: None,
                    last_sync_at: seen.last_sync_at,
                    error_message: None,
                    external_target: seen.external_target.clone(),
                    missed_scans: 0,
                    created_at: now,
                    updated_at: now,
                    last_seen_at: now,
                });
            }
        }
    }

    for (_, mut stream) in by_identity {
        let target_answered =
            stream.external_target.is_some() || scanned.contains(&stream.target_id);
        if !scanned.contains(&stream.source_id) || !target_answered {
            continue;
        }
        stream.missed_scans += 1;
        if stream.missed_scans > max_missed_scans {
            plan.removed.push(stream.id);
        } else {
            stream.status = StreamStatus::Inactive;
            stream.updated_at = now;
            plan.marked_inactive += 1;
            plan.upserts.push(stream);
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use replwatch_state::{ExternalTarget, StreamKind};

    fn logical(source: Uuid, target: Uuid, subscription: &str) -> ObservedStream {
        ObservedStream {
            source_id: source,
            target_id: target,
            kind: StreamKind::Logical {
                publication: "pub".into(),
                subscription: subscription.into(),
            },
            status: StreamStatus::Active,
            last_sync_at: None,
            external_target: None,
        }
    }

    fn both(a: Uuid, b: Uuid) -> HashSet<Uuid> {
        [a, b].into_iter().collect()
    }

    #[test]
    fn new_observation_creates_manageable_logical_stream() {
        let (s, t) = (Uuid::new_v4(), Uuid::new_v4());
        let plan = plan_merge(vec![], &[logical(s, t, "sub")], &both(s, t), Utc::now(), 3);
        assert_eq!(plan.created, 1);
        assert!(plan.upserts[0].manageable);
        assert_eq!(plan.upserts[0].missed_scans, 0);
    }

    #[test]
    fn repeated_observation_keeps_id_and_lag() {
        let (s, t) = (Uuid::new_v4(), Uuid::new_v4());
        let first = plan_merge(vec![], &[logical(s, t, "sub")], &both(s, t), Utc::now(), 3);
        let mut stored = first.upserts;
        stored[0].lag_bytes = Some(42);
        let id = stored[0].id;

        let second = plan_merge(stored, &[logical(s, t, "sub")], &both(s, t), Utc::now(), 3);
        assert_eq!(second.created, 0);
        assert_eq!(second.refreshed, 1);
        assert_eq!(second.upserts[0].id, id);
        assert_eq!(second.upserts[0].lag_bytes, Some(42));
    }

    #[test]
    fn missing_stream_goes_inactive_then_is_removed() {
        let (s, t) = (Uuid::new_v4(), Uuid::new_v4());
        let mut stored = plan_merge(vec![], &[logical(s, t, "sub")], &both(s, t), Utc::now(), 2)
            .upserts;
        let id = stored[0].id;

        for expected_misses in 1..=2 {
            let plan = plan_merge(stored, &[], &both(s, t), Utc::now(), 2);
            assert!(plan.removed.is_empty());
            assert_eq!(plan.upserts[0].status, StreamStatus::Inactive);
            assert_eq!(plan.upserts[0].missed_scans, expected_misses);
            stored = plan.upserts;
        }
        let plan = plan_merge(stored, &[], &both(s, t), Utc::now(), 2);
        assert_eq!(plan.removed, vec![id]);
        assert!(plan.upserts.is_empty());
    }

    #[test]
    fn unanswered_endpoint_does_not_count_as_miss() {
        let (s, t) = (Uuid::new_v4(), Uuid::new_v4());
        let stored = plan_merge(vec![], &[logical(s, t, "sub")], &both(s, t), Utc::now(), 0)
            .upserts;
        let only_source: HashSet<Uuid> = [s].into_iter().collect();
        let plan = plan_merge(stored, &[], &only_source, Utc::now(), 0);
        assert!(plan.upserts.is_empty());
        assert!(plan.removed.is_empty());
    }

    #[test]
    fn placeholder_target_only_needs_source() {
        let s = Uuid::new_v4();
        let external = ExternalTarget {
            address: "192.168.1.50".into(),
            application_name: "dr".into(),
        };
        let seen = ObservedStream {
            source_id: s,
            target_id: external.placeholder_id(),
            kind: StreamKind::Physical {
                application_name: "dr".into(),
                slot_name: None,
                sender_pid: Some(1),
                client_addr: Some("192.168.1.50".into()),
            },
            status: StreamStatus::Active,
            last_sync_at: None,
            external_target: Some(external),
        };
        let only_source: HashSet<Uuid> = [s].into_iter().collect();
        let stored = plan_merge(vec![], &[seen], &only_source, Utc::now(), 3).upserts;
        assert!(!stored[0].manageable);

        let plan = plan_merge(stored, &[], &only_source, Utc::now(), 3);
        assert_eq!(plan.marked_inactive, 1);
    }
}
