use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::database::Database;
use crate::database::models::{Node, NodeStatus};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::validation::{validate_node_id, validate_relay_url, validate_stats_url};

/// Periodic self-report from a relay node
#[derive(Debug, Clone, Deserialize)]
pub struct Heartbeat {
    pub node_id: String,
    pub stream_id: String,
    pub stats_url: String,
    #[serde(default)]
    pub relay_url: Option<String>,
}

/// Records node liveness and reinstates flagged or inactive nodes.
///
/// The registrar is the only writer of `last_heartbeat` and the only path
/// back to `active` for a node.
#[derive(Clone)]
pub struct HeartbeatRegistrar {
    database: Arc<dyn Database>,
}

impl HeartbeatRegistrar {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    pub async fn record_heartbeat(&self, heartbeat: Heartbeat) -> CoordinatorResult<Node> {
        self.record_heartbeat_at(heartbeat, Utc::now()).await
    }

    /// Upsert the node with an explicit heartbeat time
    pub async fn record_heartbeat_at(&self, heartbeat: Heartbeat, at: DateTime<Utc>) -> CoordinatorResult<Node> {
        validate_node_id(&heartbeat.node_id).into_result()?;
        validate_stats_url(&heartbeat.stats_url).into_result()?;
        let relay_url = heartbeat.relay_url.filter(|url| !url.trim().is_empty());
        if let Some(relay_url) = &relay_url {
            validate_relay_url(relay_url).into_result()?;
        }

        if self.database.get_stream(&heartbeat.stream_id).await?.is_none() {
            return Err(CoordinatorError::StreamNotFound(heartbeat.stream_id));
        }

        let previous = self.database.get_node(&heartbeat.node_id).await?;

        let node = Node {
            id: previous.as_ref().and_then(|n| n.id),
            node_id: heartbeat.node_id,
            stream_id: heartbeat.stream_id,
            stats_url: heartbeat.stats_url,
            relay_url,
            last_heartbeat: at,
            status: NodeStatus::Active,
            created_at: previous.as_ref().map(|n| n.created_at).unwrap_or(at),
        };
        self.database.upsert_node_heartbeat(&node).await?;

        match previous {
            None => info!(node_id = %node.node_id, stream_id = %node.stream_id, "Registered new node"),
            Some(prev) if prev.stream_id != node.stream_id => info!(
                node_id = %node.node_id,
                from = %prev.stream_id,
                to = %node.stream_id,
                "Node moved to another stream"
            ),
            Some(prev) if prev.status != NodeStatus::Active => info!(
                node_id = %node.node_id,
                previous_status = %prev.status,
                "Node reinstated by heartbeat"
            ),
            Some(_) => debug!(node_id = %node.node_id, "Heartbeat refreshed"),
        }

        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{ProbeResult, ProbeType, Stream};
    use crate::database::testing::create_test_database;

    fn heartbeat(node_id: &str, stream_id: &str) -> Heartbeat {
        Heartbeat {
            node_id: node_id.into(),
            stream_id: stream_id.into(),
            stats_url: "http://10.0.0.7:8080/stats".into(),
            relay_url: None,
        }
    }

    async fn seed_stream(db: &Arc<dyn Database>, id: &str) {
        let stream = Stream::new(id.into(), "0xsponsor".into(), 10.0, "rtmp://src/live".into());
        db.insert_stream(&stream).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_stream_is_not_found() {
        let (db, _dir) = create_test_database().await;
        let registrar = HeartbeatRegistrar::new(db.clone());

        let err = registrar.record_heartbeat(heartbeat("n1", "missing")).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::StreamNotFound(id) if id == "missing"));
        assert!(db.get_node("n1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repeated_heartbeat_updates_in_place() {
        let (db, _dir) = create_test_database().await;
        seed_stream(&db, "s1").await;
        let registrar = HeartbeatRegistrar::new(db.clone());

        let first = Utc::now() - chrono::Duration::seconds(30);
        registrar.record_heartbeat_at(heartbeat("n1", "s1"), first).await.unwrap();

        let mut second = heartbeat("n1", "s1");
        second.stats_url = "http://10.0.0.8:8080/stats".into();
        registrar.record_heartbeat(second).await.unwrap();

        let nodes = db.list_nodes_by_status(NodeStatus::Active).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].stats_url, "http://10.0.0.8:8080/stats");
        assert!(nodes[0].last_heartbeat > first);
        assert_eq!(nodes[0].created_at.timestamp(), first.timestamp());
    }

    #[tokio::test]
    async fn test_heartbeat_reinstates_flagged_node() {
        let (db, _dir) = create_test_database().await;
        seed_stream(&db, "s1").await;
        let registrar = HeartbeatRegistrar::new(db.clone());

        let node = registrar.record_heartbeat(heartbeat("n1", "s1")).await.unwrap();
        let failure = ProbeResult::new(&node, ProbeType::SpotCheck).failed("relay unreachable");
        db.record_spot_check(&failure, true).await.unwrap();
        assert_eq!(db.get_node("n1").await.unwrap().unwrap().status, NodeStatus::Flagged);

        registrar.record_heartbeat(heartbeat("n1", "s1")).await.unwrap();
        assert_eq!(db.get_node("n1").await.unwrap().unwrap().status, NodeStatus::Active);
    }

    #[tokio::test]
    async fn test_heartbeat_for_other_stream_reattaches_node() {
        let (db, _dir) = create_test_database().await;
        seed_stream(&db, "s1").await;
        seed_stream(&db, "s2").await;
        let registrar = HeartbeatRegistrar::new(db.clone());

        registrar.record_heartbeat(heartbeat("n1", "s1")).await.unwrap();
        registrar.record_heartbeat(heartbeat("n1", "s2")).await.unwrap();

        let node = db.get_node("n1").await.unwrap().unwrap();
        assert_eq!(node.stream_id, "s2");
    }

    #[tokio::test]
    async fn test_rejects_malformed_urls() {
        let (db, _dir) = create_test_database().await;
        seed_stream(&db, "s1").await;
        let registrar = HeartbeatRegistrar::new(db);

        let mut bad_stats = heartbeat("n1", "s1");
        bad_stats.stats_url = "not a url".into();
        assert!(matches!(
            registrar.record_heartbeat(bad_stats).await,
            Err(CoordinatorError::Validation(_))
        ));

        let mut bad_relay = heartbeat("n1", "s1");
        bad_relay.relay_url = Some("http://10.0.0.7/live".into());
        assert!(matches!(
            registrar.record_heartbeat(bad_relay).await,
            Err(CoordinatorError::Validation(_))
        ));
    }
}
