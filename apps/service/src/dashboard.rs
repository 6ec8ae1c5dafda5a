use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::database::Database;
use crate::database::models::{NodeStatus, StreamStatus};
use crate::error::{CoordinatorError, CoordinatorResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardNode {
    pub node_id: String,
    pub stats_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStream {
    pub stream_id: String,
    pub sponsor: String,
    pub token_balance: f64,
    pub status: StreamStatus,
    pub node_count: usize,
    pub nodes: Vec<DashboardNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub streams: Vec<DashboardStream>,
}

/// Parse a comma-separated node status filter; empty means `active`.
///
/// Unknown statuses are rejected together in one error.
pub fn parse_node_statuses(raw: &str) -> CoordinatorResult<Vec<NodeStatus>> {
    let mut statuses = Vec::new();
    let mut invalid = Vec::new();

    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match part.parse::<NodeStatus>() {
            Ok(status) if !statuses.contains(&status) => statuses.push(status),
            Ok(_) => {}
            Err(_) => invalid.push(part),
        }
    }

    if !invalid.is_empty() {
        let valid: Vec<&str> = NodeStatus::ALL.iter().map(NodeStatus::as_str).collect();
        return Err(CoordinatorError::validation(format!(
            "Invalid node status(es) provided: {}. Valid statuses are: {}",
            invalid.join(", "),
            valid.join(", ")
        )));
    }

    if statuses.is_empty() {
        statuses.push(NodeStatus::Active);
    }
    Ok(statuses)
}

/// Operational streams with their nodes, filtered by node status
pub async fn operational_dashboard(
    database: &Arc<dyn Database>,
    limit: usize,
    node_statuses: &[NodeStatus],
) -> CoordinatorResult<Dashboard> {
    let streams = database.list_streams(Some(&StreamStatus::OPERATIONAL), Some(limit)).await?;
    if streams.is_empty() {
        return Ok(Dashboard { streams: Vec::new() });
    }

    let stream_ids: Vec<String> = streams.iter().map(|s| s.stream_id.clone()).collect();
    let mut nodes_by_stream: HashMap<String, Vec<DashboardNode>> = HashMap::new();
    for node in database.list_nodes_for_streams(&stream_ids, node_statuses).await? {
        nodes_by_stream
            .entry(node.stream_id)
            .or_default()
            .push(DashboardNode { node_id: node.node_id, stats_url: node.stats_url });
    }

    let streams = streams
        .into_iter()
        .map(|stream| {
            let nodes = nodes_by_stream.remove(&stream.stream_id).unwrap_or_default();
            DashboardStream {
                stream_id: stream.stream_id,
                sponsor: stream.sponsor_address,
                token_balance: stream.token_balance,
                status: stream.status,
                node_count: nodes.len(),
                nodes,
            }
        })
        .collect();

    Ok(Dashboard { streams })
}
