//! Prometheus text exposition format.
//!
//! Renders the latest lag of every stream and the recorded health of every
//! endpoint for scraping by a Prometheus server or compatible agent.

use std::collections::HashMap;

use uuid::Uuid;

use replwatch_pg::{EndpointHealth, HealthState};
use replwatch_state::{DatabaseEndpoint, ReplicationStream, StreamStatus};

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn node_name(endpoints: &[DatabaseEndpoint], id: Uuid, stream: &ReplicationStream) -> String {
    match endpoints.iter().find(|e| e.id == id) {
        Some(e) => e.name.clone(),
        None => stream
            .external_target
            .as_ref()
            .map(|t| t.application_name.clone())
            .unwrap_or_else(|| id.to_string()),
    }
}

fn stream_labels(endpoints: &[DatabaseEndpoint], stream: &ReplicationStream) -> String {
    format!(
        "stream=\"{}\",source=\"{}\",target=\"{}\",type=\"{}\"",
        stream.id,
        escape(&node_name(endpoints, stream.source_id, stream)),
        escape(&node_name(endpoints, stream.target_id, stream)),
        stream.kind.label()
    )
}

/// Render stream lag and endpoint health into Prometheus text format.
///
/// Lag gauges are emitted only for streams that have been sampled.
pub fn render_prometheus(
    endpoints: &[DatabaseEndpoint],
    streams: &[ReplicationStream],
    health: &HashMap<Uuid, EndpointHealth>,
) -> String {
    let mut out = String::new();

    out.push_str("# HELP replwatch_replication_lag_seconds Replication lag in seconds.\n");
    out.push_str("# TYPE replwatch_replication_lag_seconds gauge\n");
    for s in streams {
        if let Some(lag) = s.lag_seconds {
            out.push_str(&format!(
                "replwatch_replication_lag_seconds{{{}}} {:.3}\n",
                stream_labels(endpoints, s),
                lag
            ));
        }
    }

    out.push_str("# HELP replwatch_replication_lag_bytes Replication lag in bytes of WAL.\n");
    out.push_str("# TYPE replwatch_replication_lag_bytes gauge\n");
    for s in streams {
        if let Some(lag) = s.lag_bytes {
            out.push_str(&format!(
                "replwatch_replication_lag_bytes{{{}}} {}\n",
                stream_labels(endpoints, s),
                lag
            ));
        }
    }

    out.push_str("# HELP replwatch_stream_up Whether the stream is actively replicating.\n");
    out.push_str("# TYPE replwatch_stream_up gauge\n");
    for s in streams {
        out.push_str(&format!(
            "replwatch_stream_up{{{}}} {}\n",
            stream_labels(endpoints, s),
            u8::from(s.status == StreamStatus::Active)
        ));
    }

    out.push_str("# HELP replwatch_database_up Whether the last health check succeeded.\n");
    out.push_str("# TYPE replwatch_database_up gauge\n");
    for e in endpoints {
        let Some(h) = health.get(&e.id) else {
            continue;
        };
        if h.status == HealthState::Unknown {
            continue;
        }
        out.push_str(&format!(
            "replwatch_database_up{{database=\"{}\",role=\"{}\"}} {}\n",
            escape(&e.name),
            e.role,
            u8::from(h.status == HealthState::Healthy)
        ));
    }

    out.push_str("# HELP replwatch_database_latency_ms Last health check round trip.\n");
    out.push_str("# TYPE replwatch_database_latency_ms gauge\n");
    for e in endpoints {
        let Some(latency) = health.get(&e.id).and_then(|h| h.latency_ms) else {
            continue;
        };
        out.push_str(&format!(
            "replwatch_database_latency_ms{{database=\"{}\",role=\"{}\"}} {}\n",
            escape(&e.name),
            e.role,
            latency
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use replwatch_state::{DatabaseRole, EndpointSpec, StreamKind};

    fn endpoint(name: &str, role: DatabaseRole) -> DatabaseEndpoint {
        DatabaseEndpoint::create(EndpointSpec {
            name: name.into(),
            host: format!("{name}.internal"),
            port: 5432,
            database: "app".into(),
            role,
            environment: "production".into(),
            cloud_provider: "aws".into(),
            credential_ref: "secret".into(),
            use_iam_auth: false,
        })
        .unwrap()
    }

    fn test_stream(source: Uuid, target: Uuid, lag: Option<f64>) -> ReplicationStream {
        let now = Utc::now();
        ReplicationStream {
            id: Uuid::new_v4(),
            source_id: source,
            target_id: target,
            kind: StreamKind::Physical {
                application_name: "walreceiver".into(),
                slot_name: None,
                sender_pid: None,
                client_addr: None,
            },
            status: StreamStatus::Active,
            lag_bytes: lag.map(|_| 2048),
            lag_seconds: lag,
            last_sync_at: None,
            error_message: None,
            manageable: false,
            external_target: None,
            missed_scans: 0,
            created_at: now,
            updated_at: now,
            last_seen_at: now,
        }
    }

    fn health(status: HealthState) -> EndpointHealth {
        EndpointHealth {
            status,
            consecutive_failures: 0,
            last_check: Some(Utc::now()),
            latency_ms: Some(4),
            server_version: Some("16.2".into()),
            last_error: None,
        }
    }

    #[test]
    fn render_contains_all_metrics() {
        let p = endpoint("primary", DatabaseRole::Primary);
        let r = endpoint("replica", DatabaseRole::Replica);
        let s = test_stream(p.id, r.id, Some(1.5));
        let health = HashMap::from([(p.id, health(HealthState::Healthy))]);
        let output = render_prometheus(&[p, r], &[s], &health);

        assert!(output.contains("# TYPE replwatch_replication_lag_seconds gauge"));
        assert!(output.contains("# TYPE replwatch_replication_lag_bytes gauge"));
        assert!(output.contains("# TYPE replwatch_stream_up gauge"));
        assert!(output.contains("# TYPE replwatch_database_up gauge"));
        assert!(output.contains("source=\"primary\",target=\"replica\",type=\"physical\"} 1.500"));
        assert!(output.contains("replwatch_database_up{database=\"primary\",role=\"primary\"} 1"));
        assert!(output.contains("replwatch_database_latency_ms{database=\"primary\",role=\"primary\"} 4"));
    }

    #[test]
    fn unsampled_stream_has_no_lag_line() {
        let p = endpoint("primary", DatabaseRole::Primary);
        let r = endpoint("replica", DatabaseRole::Replica);
        let s = test_stream(p.id, r.id, None);
        let output = render_prometheus(&[p, r], &[s], &HashMap::new());
        assert!(!output.contains("replwatch_replication_lag_seconds{"));
        assert!(output.contains("replwatch_stream_up{"));
    }

    #[test]
    fn every_sample_line_has_labels() {
        let p = endpoint("primary", DatabaseRole::Primary);
        let r = endpoint("replica", DatabaseRole::Replica);
        let streams = vec![
            test_stream(p.id, r.id, Some(0.0)),
            test_stream(p.id, r.id, Some(12.0)),
        ];
        let health = HashMap::from([
            (p.id, health(HealthState::Healthy)),
            (r.id, health(HealthState::Unhealthy)),
        ]);
        let output = render_prometheus(&[p, r], &streams, &health);
        for line in output.lines().filter(|l| !l.starts_with('#')) {
            assert!(line.contains('{'), "unlabelled line: {line}");
        }
        assert!(output.contains("replwatch_database_up{database=\"replica\",role=\"replica\"} 0"));
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(escape("a\"b\\c"), "a\\\"b\\\\c");
    }
}
