//! Topology export: nodes, edges and a summary, for dashboards.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use replwatch_state::{DatabaseEndpoint, ReplicationStream, StreamStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopologyNode {
    pub id: Uuid,
    pub name: String,
    /// `primary`, `replica`, or `external` for a standby that is not a
    /// configured endpoint.
    pub role: String,
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub environment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopologyEdge {
    pub id: Uuid,
    pub source: Uuid,
    pub target: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: StreamStatus,
    pub lag_seconds: Option<f64>,
    pub lag_bytes: Option<u64>,
    pub manageable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TopologySummary {
    pub total_databases: usize,
    pub total_streams: usize,
    pub logical_streams: usize,
    pub physical_streams: usize,
    pub active_streams: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TopologyGraph {
    pub nodes: Vec<TopologyNode>,
    pub edges: Vec<TopologyEdge>,
    pub summary: TopologySummary,
}

pub fn build_topology(
    endpoints: &[DatabaseEndpoint],
    streams: &[ReplicationStream],
) -> TopologyGraph {
    let mut nodes: Vec<TopologyNode> = endpoints
        .iter()
        .map(|e| TopologyNode {
            id: e.id,
            name: e.name.clone(),
            role: e.role.to_string(),
            host: e.host.clone(),
            port: Some(e.port),
            environment: e.environment.clone(),
        })
        .collect();

    for stream in streams {
        let Some(external) = &stream.external_target else {
            continue;
        };
        if nodes.iter().any(|n| n.id == stream.target_id) {
            continue;
        }
        nodes.push(TopologyNode {
            id: stream.target_id,
            name: external.application_name.clone(),
            role: "external".to_string(),
            host: external.address.clone(),
            port: None,
            environment: "unknown".to_string(),
        });
    }

    let edges: Vec<TopologyEdge> = streams
        .iter()
        .map(|s| TopologyEdge {
            id: s.id,
            source: s.source_id,
            target: s.target_id,
            kind: s.kind.label().to_string(),
            status: s.status,
            lag_seconds: s.lag_seconds,
            lag_bytes: s.lag_bytes,
            manageable: s.manageable,
        })
        .collect();

    let logical_streams = streams.iter().filter(|s| s.kind.is_logical()).count();
    let summary = TopologySummary {
        total_databases: endpoints.len(),
        total_streams: streams.len(),
        logical_streams,
        physical_streams: streams.len() - logical_streams,
        active_streams: streams
            .iter()
            .filter(|s| s.status == StreamStatus::Active)
            .count(),
    };

    TopologyGraph {
        nodes,
        edges,
        summary,
    }
}
