use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, Value, params};

use super::models::{
    BandwidthLedger, Node, NodeStatus, ProbeResult, ProbeTally, ProbeType, Stream, StreamStatus,
    StreamTransition, UserAccount, i64_to_timestamp, timestamp_to_i64,
};
use crate::pool::LibsqlPool;

/// Database trait for abstracting entity store operations
///
/// Every method is a single statement or a single transaction; nothing holds
/// a connection across a network call.
#[async_trait]
pub trait Database: Send + Sync {
    /// Insert a new stream, returning its row id
    async fn insert_stream(&self, stream: &Stream) -> Result<i64>;

    /// Get a stream by its public id
    async fn get_stream(&self, stream_id: &str) -> Result<Option<Stream>>;

    /// List streams, optionally restricted to a set of statuses
    async fn list_streams(&self, statuses: Option<&[StreamStatus]>, limit: Option<usize>) -> Result<Vec<Stream>>;

    /// Count streams in a set of statuses
    async fn count_streams(&self, statuses: &[StreamStatus]) -> Result<u64>;

    /// Persist a stream's new status and timestamps together with its history row
    ///
    /// The update only applies while the stream is still in `transition.from_status`;
    /// returns false, writing nothing, when another transition got there first.
    async fn apply_transition(&self, stream: &Stream, transition: &StreamTransition) -> Result<bool>;

    /// Transition history of a stream, oldest first
    async fn get_transitions(&self, stream_id: &str) -> Result<Vec<StreamTransition>>;

    /// Delete a stream and the nodes attached to it; false if it did not exist
    async fn delete_stream(&self, stream_id: &str) -> Result<bool>;

    /// Get a node by id
    async fn get_node(&self, node_id: &str) -> Result<Option<Node>>;

    /// Insert the node or refresh it in place, forcing it back to active
    async fn upsert_node_heartbeat(&self, node: &Node) -> Result<()>;

    /// All nodes with a given status
    async fn list_nodes_by_status(&self, status: NodeStatus) -> Result<Vec<Node>>;

    /// Nodes attached to any of the given streams and in any of the given statuses
    async fn list_nodes_for_streams(&self, stream_ids: &[String], statuses: &[NodeStatus]) -> Result<Vec<Node>>;

    /// Count nodes with a given status
    async fn count_nodes(&self, status: NodeStatus) -> Result<u64>;

    /// Active nodes with at least one successful stats poll newer than `since`
    async fn list_recently_healthy_nodes(&self, since: DateTime<Utc>) -> Result<Vec<Node>>;

    /// Demote active nodes whose last heartbeat is older than `cutoff`; returns their ids
    async fn demote_stale_nodes(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>>;

    /// Append a probe result
    async fn insert_probe_result(&self, result: &ProbeResult) -> Result<i64>;

    /// Append a spot-check result and, when `flag_node` is set, flag the node in the same transaction.
    ///
    /// Only a node still active on the probed stream is flagged; returns whether it was.
    async fn record_spot_check(&self, result: &ProbeResult, flag_node: bool) -> Result<bool>;

    /// Most recent probe results for a node
    async fn recent_probe_results(&self, node_id: &str, limit: usize) -> Result<Vec<ProbeResult>>;

    /// Per (stream, node) probe counts newer than `since`, optionally for one node only
    async fn probe_tallies(&self, since: DateTime<Utc>, node_id: Option<&str>) -> Result<Vec<ProbeTally>>;

    /// Delete probe results older than `cutoff`; returns the number removed
    async fn delete_probe_results_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Append a bandwidth report
    async fn insert_bandwidth_report(&self, report: &BandwidthLedger) -> Result<i64>;

    /// Bandwidth reports newer than `since`, optionally for one node and/or verified only
    async fn list_bandwidth_reports(
        &self,
        since: DateTime<Utc>,
        node_id: Option<&str>,
        verified_only: bool,
    ) -> Result<Vec<BandwidthLedger>>;

    /// Reports newer than `since` whose trust score is below `threshold`
    async fn count_low_trust_reports(&self, since: DateTime<Utc>, threshold: f64) -> Result<u64>;

    /// Get a user account
    async fn get_user_account(&self, user_id: &str) -> Result<Option<UserAccount>>;

    /// Insert a user account unless one already exists
    async fn insert_user_account(&self, account: &UserAccount) -> Result<()>;

    /// Count accounts whose 30-day earnings fall within [low, high]
    async fn count_accounts_with_earnings_between(&self, low: f64, high: f64) -> Result<u64>;

    /// Accounts with positive 30-day earnings, highest first
    async fn top_earners(&self, limit: usize) -> Result<Vec<UserAccount>>;
}

const STREAM_COLUMNS: &str = "id, stream_id, sponsor_address, token_balance, rtmp_url, status, created_at, \
     testing_started_at, live_started_at, offline_at, stale_at, archived_at, \
     total_gb_delivered, total_cost_usd, platform_fee_usd, creator_payout_usd";

const NODE_COLUMNS: &str =
    "id, node_id, stream_id, stats_url, relay_url, last_heartbeat, status, created_at";

const PROBE_COLUMNS: &str = "id, stream_id, node_id, probe_type, success, response_data, error_message, probe_timestamp";

const BANDWIDTH_COLUMNS: &str = "id, session_id, reporting_node_id, bytes_transferred, start_interval, end_interval, \
     source_bitrate_kbps, is_verified, trust_score, verification_notes, report_timestamp";

const ACCOUNT_COLUMNS: &str =
    "user_id, balance_usd, total_gb_relayed, earnings_last_30d, trust_score, flags, last_updated_at";

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::LibsqlManager>> {
        Ok(self.pool.get().await?)
    }
}

fn optional_timestamp(value: Option<DateTime<Utc>>) -> Option<i64> {
    value.map(timestamp_to_i64)
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn parse_column<T: std::str::FromStr<Err = String>>(raw: String) -> Result<T> {
    raw.parse::<T>().map_err(anyhow::Error::msg)
}

fn stream_from_row(row: &Row) -> Result<Stream> {
    Ok(Stream {
        id: Some(row.get(0)?),
        stream_id: row.get(1)?,
        sponsor_address: row.get(2)?,
        token_balance: row.get(3)?,
        rtmp_url: row.get(4)?,
        status: parse_column(row.get::<String>(5)?)?,
        created_at: i64_to_timestamp(row.get(6)?),
        testing_started_at: row.get::<Option<i64>>(7)?.map(i64_to_timestamp),
        live_started_at: row.get::<Option<i64>>(8)?.map(i64_to_timestamp),
        offline_at: row.get::<Option<i64>>(9)?.map(i64_to_timestamp),
        stale_at: row.get::<Option<i64>>(10)?.map(i64_to_timestamp),
        archived_at: row.get::<Option<i64>>(11)?.map(i64_to_timestamp),
        total_gb_delivered: row.get(12)?,
        total_cost_usd: row.get(13)?,
        platform_fee_usd: row.get(14)?,
        creator_payout_usd: row.get(15)?,
    })
}

fn node_from_row(row: &Row) -> Result<Node> {
    Ok(Node {
        id: Some(row.get(0)?),
        node_id: row.get(1)?,
        stream_id: row.get(2)?,
        stats_url: row.get(3)?,
        relay_url: row.get(4)?,
        last_heartbeat: i64_to_timestamp(row.get(5)?),
        status: parse_column(row.get::<String>(6)?)?,
        created_at: i64_to_timestamp(row.get(7)?),
    })
}

fn probe_from_row(row: &Row) -> Result<ProbeResult> {
    Ok(ProbeResult {
        id: Some(row.get(0)?),
        stream_id: row.get(1)?,
        node_id: row.get(2)?,
        probe_type: parse_column::<ProbeType>(row.get::<String>(3)?)?,
        success: row.get::<i64>(4)? != 0,
        response_data: row.get(5)?,
        error_message: row.get(6)?,
        probe_timestamp: i64_to_timestamp(row.get(7)?),
    })
}

fn bandwidth_from_row(row: &Row) -> Result<BandwidthLedger> {
    Ok(BandwidthLedger {
        id: Some(row.get(0)?),
        session_id: row.get(1)?,
        reporting_node_id: row.get(2)?,
        bytes_transferred: row.get(3)?,
        start_interval: i64_to_timestamp(row.get(4)?),
        end_interval: i64_to_timestamp(row.get(5)?),
        source_bitrate_kbps: row.get(6)?,
        is_verified: row.get::<i64>(7)? != 0,
        trust_score: row.get(8)?,
        verification_notes: row.get(9)?,
        report_timestamp: i64_to_timestamp(row.get(10)?),
    })
}

fn account_from_row(row: &Row) -> Result<UserAccount> {
    let flags: String = row.get(5)?;
    Ok(UserAccount {
        user_id: row.get(0)?,
        balance_usd: row.get(1)?,
        total_gb_relayed: row.get(2)?,
        earnings_last_30d: row.get(3)?,
        trust_score: row.get(4)?,
        flags: serde_json::from_str(&flags).context("Malformed account flags")?,
        last_updated_at: i64_to_timestamp(row.get(6)?),
    })
}

async fn count_query(conn: &libsql::Connection, sql: &str, values: Vec<Value>) -> Result<u64> {
    let mut rows = conn.query(sql, values).await?;
    match rows.next().await? {
        Some(row) => Ok(row.get::<i64>(0)?.max(0) as u64),
        None => Ok(0),
    }
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn insert_stream(&self, stream: &Stream) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO streams (stream_id, sponsor_address, token_balance, rtmp_url, status, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                stream.stream_id.clone(),
                stream.sponsor_address.clone(),
                stream.token_balance,
                stream.rtmp_url.clone(),
                stream.status.as_str(),
                timestamp_to_i64(stream.created_at)
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn get_stream(&self, stream_id: &str) -> Result<Option<Stream>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {STREAM_COLUMNS} FROM streams WHERE stream_id = ?"),
                params![stream_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(stream_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_streams(&self, statuses: Option<&[StreamStatus]>, limit: Option<usize>) -> Result<Vec<Stream>> {
        let conn = self.get_conn().await?;
        let mut sql = format!("SELECT {STREAM_COLUMNS} FROM streams");
        let mut values: Vec<Value> = Vec::new();

        if let Some(statuses) = statuses {
            sql.push_str(&format!(" WHERE status IN ({})", placeholders(statuses.len())));
            values.extend(statuses.iter().map(|s| Value::Text(s.as_str().to_string())));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(limit as i64));
        }

        let mut rows = conn.query(&sql, values).await?;
        let mut streams = Vec::new();
        while let Some(row) = rows.next().await? {
            streams.push(stream_from_row(&row)?);
        }

        Ok(streams)
    }

    async fn count_streams(&self, statuses: &[StreamStatus]) -> Result<u64> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT COUNT(*) FROM streams WHERE status IN ({})", placeholders(statuses.len()));
        let values = statuses.iter().map(|s| Value::Text(s.as_str().to_string())).collect();
        count_query(&conn, &sql, values).await
    }

    async fn apply_transition(&self, stream: &Stream, transition: &StreamTransition) -> Result<bool> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;

        let updated = tx
            .execute(
                "UPDATE streams SET status = ?, testing_started_at = ?, live_started_at = ?, offline_at = ?, stale_at = ?, archived_at = ? WHERE stream_id = ? AND status = ?",
                params![
                    stream.status.as_str(),
                    optional_timestamp(stream.testing_started_at),
                    optional_timestamp(stream.live_started_at),
                    optional_timestamp(stream.offline_at),
                    optional_timestamp(stream.stale_at),
                    optional_timestamp(stream.archived_at),
                    stream.stream_id.clone(),
                    transition.from_status.as_str()
                ],
            )
            .await?;
        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO stream_transitions (stream_id, from_status, to_status, transitioned_at) VALUES (?, ?, ?, ?)",
            params![
                transition.stream_id.clone(),
                transition.from_status.as_str(),
                transition.to_status.as_str(),
                timestamp_to_i64(transition.transitioned_at)
            ],
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn get_transitions(&self, stream_id: &str) -> Result<Vec<StreamTransition>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT stream_id, from_status, to_status, transitioned_at FROM stream_transitions WHERE stream_id = ? ORDER BY id ASC",
                params![stream_id],
            )
            .await?;

        let mut transitions = Vec::new();
        while let Some(row) = rows.next().await? {
            transitions.push(StreamTransition {
                stream_id: row.get(0)?,
                from_status: parse_column(row.get::<String>(1)?)?,
                to_status: parse_column(row.get::<String>(2)?)?,
                transitioned_at: i64_to_timestamp(row.get(3)?),
            });
        }

        Ok(transitions)
    }

    async fn delete_stream(&self, stream_id: &str) -> Result<bool> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;

        tx.execute("DELETE FROM nodes WHERE stream_id = ?", params![stream_id]).await?;
        tx.execute("DELETE FROM stream_transitions WHERE stream_id = ?", params![stream_id]).await?;
        let deleted = tx.execute("DELETE FROM streams WHERE stream_id = ?", params![stream_id]).await?;

        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE node_id = ?"), params![node_id])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(node_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert_node_heartbeat(&self, node: &Node) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO nodes (node_id, stream_id, stats_url, relay_url, last_heartbeat, status, created_at)
             VALUES (?, ?, ?, ?, ?, 'active', ?)
             ON CONFLICT(node_id) DO UPDATE SET
                stream_id = excluded.stream_id,
                stats_url = excluded.stats_url,
                relay_url = excluded.relay_url,
                last_heartbeat = excluded.last_heartbeat,
                status = 'active'",
            params![
                node.node_id.clone(),
                node.stream_id.clone(),
                node.stats_url.clone(),
                node.relay_url.clone(),
                timestamp_to_i64(node.last_heartbeat),
                timestamp_to_i64(node.created_at)
            ],
        )
        .await?;

        Ok(())
    }

    async fn list_nodes_by_status(&self, status: NodeStatus) -> Result<Vec<Node>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE status = ? ORDER BY node_id"),
                params![status.as_str()],
            )
            .await?;

        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await? {
            nodes.push(node_from_row(&row)?);
        }

        Ok(nodes)
    }

    async fn list_nodes_for_streams(&self, stream_ids: &[String], statuses: &[NodeStatus]) -> Result<Vec<Node>> {
        if stream_ids.is_empty() || statuses.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE stream_id IN ({}) AND status IN ({}) ORDER BY node_id",
            placeholders(stream_ids.len()),
            placeholders(statuses.len())
        );
        let values: Vec<Value> = stream_ids
            .iter()
            .map(|id| Value::Text(id.clone()))
            .chain(statuses.iter().map(|s| Value::Text(s.as_str().to_string())))
            .collect();

        let mut rows = conn.query(&sql, values).await?;
        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await? {
            nodes.push(node_from_row(&row)?);
        }

        Ok(nodes)
    }

    async fn count_nodes(&self, status: NodeStatus) -> Result<u64> {
        let conn = self.get_conn().await?;
        count_query(
            &conn,
            "SELECT COUNT(*) FROM nodes WHERE status = ?",
            vec![Value::Text(status.as_str().to_string())],
        )
        .await
    }

    async fn list_recently_healthy_nodes(&self, since: DateTime<Utc>) -> Result<Vec<Node>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM nodes n WHERE n.status = 'active' AND EXISTS (
                SELECT 1 FROM probe_results p
                WHERE p.node_id = n.node_id
                  AND p.probe_type = 'stats_poll'
                  AND p.success = 1
                  AND p.probe_timestamp > ?
             ) ORDER BY n.node_id"
        );

        let mut rows = conn.query(&sql, params![timestamp_to_i64(since)]).await?;
        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await? {
            nodes.push(node_from_row(&row)?);
        }

        Ok(nodes)
    }

    async fn demote_stale_nodes(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "UPDATE nodes SET status = 'inactive' WHERE status = 'active' AND last_heartbeat < ? RETURNING node_id",
                params![timestamp_to_i64(cutoff)],
            )
            .await?;

        let mut demoted = Vec::new();
        while let Some(row) = rows.next().await? {
            demoted.push(row.get::<String>(0)?);
        }

        Ok(demoted)
    }

    async fn insert_probe_result(&self, result: &ProbeResult) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO probe_results (stream_id, node_id, probe_type, success, response_data, error_message, probe_timestamp) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                result.stream_id.clone(),
                result.node_id.clone(),
                result.probe_type.as_str(),
                if result.success { 1 } else { 0 },
                result.response_data.clone(),
                result.error_message.clone(),
                timestamp_to_i64(result.probe_timestamp)
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn record_spot_check(&self, result: &ProbeResult, flag_node: bool) -> Result<bool> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;

        tx.execute(
            "INSERT INTO probe_results (stream_id, node_id, probe_type, success, response_data, error_message, probe_timestamp) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                result.stream_id.clone(),
                result.node_id.clone(),
                result.probe_type.as_str(),
                if result.success { 1 } else { 0 },
                result.response_data.clone(),
                result.error_message.clone(),
                timestamp_to_i64(result.probe_timestamp)
            ],
        )
        .await?;

        let flagged = if flag_node {
            tx.execute(
                "UPDATE nodes SET status = 'flagged' WHERE node_id = ? AND stream_id = ? AND status = 'active'",
                params![result.node_id.clone(), result.stream_id.clone()],
            )
            .await?
                > 0
        } else {
            false
        };

        tx.commit().await?;
        Ok(flagged)
    }

    async fn recent_probe_results(&self, node_id: &str, limit: usize) -> Result<Vec<ProbeResult>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {PROBE_COLUMNS} FROM probe_results WHERE node_id = ? ORDER BY probe_timestamp DESC, id DESC LIMIT ?"
                ),
                params![node_id, limit as i64],
            )
            .await?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await? {
            results.push(probe_from_row(&row)?);
        }

        Ok(results)
    }

    async fn probe_tallies(&self, since: DateTime<Utc>, node_id: Option<&str>) -> Result<Vec<ProbeTally>> {
        let conn = self.get_conn().await?;
        let mut sql = String::from(
            "SELECT stream_id, node_id,
                SUM(CASE WHEN probe_type = 'stats_poll' THEN 1 ELSE 0 END),
                SUM(CASE WHEN probe_type = 'stats_poll' AND success = 1 THEN 1 ELSE 0 END),
                SUM(CASE WHEN probe_type = 'spot_check' AND success = 0 THEN 1 ELSE 0 END)
             FROM probe_results WHERE probe_timestamp > ?",
        );
        let mut values = vec![Value::Integer(timestamp_to_i64(since))];
        if let Some(node_id) = node_id {
            sql.push_str(" AND node_id = ?");
            values.push(Value::Text(node_id.to_string()));
        }
        sql.push_str(" GROUP BY stream_id, node_id ORDER BY stream_id, node_id");

        let mut rows = conn.query(&sql, values).await?;
        let mut tallies = Vec::new();
        while let Some(row) = rows.next().await? {
            tallies.push(ProbeTally {
                stream_id: row.get(0)?,
                node_id: row.get(1)?,
                total_polls: row.get::<i64>(2)?.max(0) as u64,
                successful_polls: row.get::<i64>(3)?.max(0) as u64,
                failed_spot_checks: row.get::<i64>(4)?.max(0) as u64,
            });
        }

        Ok(tallies)
    }

    async fn delete_probe_results_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute(
                "DELETE FROM probe_results WHERE probe_timestamp < ?",
                params![timestamp_to_i64(cutoff)],
            )
            .await?;

        Ok(deleted)
    }

    async fn insert_bandwidth_report(&self, report: &BandwidthLedger) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO bandwidth_ledger (session_id, reporting_node_id, bytes_transferred, start_interval, end_interval, source_bitrate_kbps, is_verified, trust_score, verification_notes, report_timestamp) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                report.session_id.clone(),
                report.reporting_node_id.clone(),
                report.bytes_transferred,
                timestamp_to_i64(report.start_interval),
                timestamp_to_i64(report.end_interval),
                report.source_bitrate_kbps,
                if report.is_verified { 1 } else { 0 },
                report.trust_score,
                report.verification_notes.clone(),
                timestamp_to_i64(report.report_timestamp)
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn list_bandwidth_reports(
        &self,
        since: DateTime<Utc>,
        node_id: Option<&str>,
        verified_only: bool,
    ) -> Result<Vec<BandwidthLedger>> {
        let conn = self.get_conn().await?;
        let mut sql = format!("SELECT {BANDWIDTH_COLUMNS} FROM bandwidth_ledger WHERE report_timestamp >= ?");
        let mut values = vec![Value::Integer(timestamp_to_i64(since))];
        if let Some(node_id) = node_id {
            sql.push_str(" AND reporting_node_id = ?");
            values.push(Value::Text(node_id.to_string()));
        }
        if verified_only {
            sql.push_str(" AND is_verified = 1");
        }
        sql.push_str(" ORDER BY report_timestamp ASC, id ASC");

        let mut rows = conn.query(&sql, values).await?;
        let mut reports = Vec::new();
        while let Some(row) = rows.next().await? {
            reports.push(bandwidth_from_row(&row)?);
        }

        Ok(reports)
    }

    async fn count_low_trust_reports(&self, since: DateTime<Utc>, threshold: f64) -> Result<u64> {
        let conn = self.get_conn().await?;
        count_query(
            &conn,
            "SELECT COUNT(*) FROM bandwidth_ledger WHERE trust_score < ? AND report_timestamp >= ?",
            vec![Value::Real(threshold), Value::Integer(timestamp_to_i64(since))],
        )
        .await
    }

    async fn get_user_account(&self, user_id: &str) -> Result<Option<UserAccount>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM user_accounts WHERE user_id = ?"),
                params![user_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(account_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert_user_account(&self, account: &UserAccount) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR IGNORE INTO user_accounts (user_id, balance_usd, total_gb_relayed, earnings_last_30d, trust_score, flags, last_updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                account.user_id.clone(),
                account.balance_usd,
                account.total_gb_relayed,
                account.earnings_last_30d,
                account.trust_score,
                serde_json::to_string(&account.flags)?,
                timestamp_to_i64(account.last_updated_at)
            ],
        )
        .await?;

        Ok(())
    }

    async fn count_accounts_with_earnings_between(&self, low: f64, high: f64) -> Result<u64> {
        let conn = self.get_conn().await?;
        count_query(
            &conn,
            "SELECT COUNT(*) FROM user_accounts WHERE earnings_last_30d >= ? AND earnings_last_30d <= ?",
            vec![Value::Real(low), Value::Real(high)],
        )
        .await
    }

    async fn top_earners(&self, limit: usize) -> Result<Vec<UserAccount>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM user_accounts WHERE earnings_last_30d > 0 ORDER BY earnings_last_30d DESC LIMIT ?"
                ),
                params![limit as i64],
            )
            .await?;

        let mut accounts = Vec::new();
        while let Some(row) = rows.next().await? {
            accounts.push(account_from_row(&row)?);
        }

        Ok(accounts)
    }
}
