use anyhow::Result;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 3;

/// Run database migrations
///
/// This is the single source of truth for the coordinator schema. Both the
/// worker and the API server call it on startup; it is a no-op once current.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Streams, nodes and probe log").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Stream transition history and node relay endpoint").await?;
    }

    if current_version < 3 {
        run_migration_v3(conn).await?;
        record_migration(conn, 3, "Bandwidth ledger, user accounts and stream economics").await?;
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: Initial schema
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS streams (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            stream_id TEXT NOT NULL UNIQUE,
            sponsor_address TEXT NOT NULL,
            token_balance REAL NOT NULL DEFAULT 0.0,
            rtmp_url TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'READY',
            created_at INTEGER NOT NULL,
            testing_started_at INTEGER,
            live_started_at INTEGER,
            offline_at INTEGER,
            stale_at INTEGER,
            archived_at INTEGER
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS nodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            node_id TEXT NOT NULL UNIQUE,
            stream_id TEXT NOT NULL,
            stats_url TEXT NOT NULL,
            last_heartbeat INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    // Append-only; rows outlive their node so payout windows stay intact
    conn.execute(
        "CREATE TABLE IF NOT EXISTS probe_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            stream_id TEXT NOT NULL,
            node_id TEXT NOT NULL,
            probe_type TEXT NOT NULL,
            success INTEGER NOT NULL,
            response_data TEXT,
            error_message TEXT,
            probe_timestamp INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_streams_status ON streams(status)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_nodes_stream_id ON nodes(stream_id)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_nodes_status ON nodes(status)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_nodes_last_heartbeat ON nodes(last_heartbeat)", ()).await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_probe_results_node_id ON probe_results(node_id)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_probe_results_timestamp ON probe_results(probe_timestamp DESC)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_probe_results_stream_timestamp ON probe_results(stream_id, probe_timestamp DESC)", ()).await?;

    Ok(())
}

/// Migration v2: Transition history and node-advertised relay endpoints
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS stream_transitions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            stream_id TEXT NOT NULL,
            from_status TEXT NOT NULL,
            to_status TEXT NOT NULL,
            transitioned_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute("ALTER TABLE nodes ADD COLUMN relay_url TEXT", ()).await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_stream_transitions_stream ON stream_transitions(stream_id, id)",
        (),
    )
    .await?;

    tracing::info!("Added stream transition history and node relay endpoint");
    Ok(())
}

/// Migration v3: Economics tables and stream rollup columns
async fn run_migration_v3(conn: &Connection) -> Result<()> {
    conn.execute("ALTER TABLE streams ADD COLUMN total_gb_delivered REAL NOT NULL DEFAULT 0.0", ()).await?;
    conn.execute("ALTER TABLE streams ADD COLUMN total_cost_usd REAL NOT NULL DEFAULT 0.0", ()).await?;
    conn.execute("ALTER TABLE streams ADD COLUMN platform_fee_usd REAL NOT NULL DEFAULT 0.0", ()).await?;
    conn.execute("ALTER TABLE streams ADD COLUMN creator_payout_usd REAL NOT NULL DEFAULT 0.0", ()).await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS bandwidth_ledger (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            reporting_node_id TEXT NOT NULL,
            bytes_transferred INTEGER NOT NULL,
            start_interval INTEGER NOT NULL,
            end_interval INTEGER NOT NULL,
            source_bitrate_kbps INTEGER,
            is_verified INTEGER NOT NULL DEFAULT 0,
            trust_score REAL,
            verification_notes TEXT,
            report_timestamp INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_accounts (
            user_id TEXT PRIMARY KEY,
            balance_usd REAL NOT NULL DEFAULT 0.0,
            total_gb_relayed REAL NOT NULL DEFAULT 0.0,
            earnings_last_30d REAL NOT NULL DEFAULT 0.0,
            trust_score REAL NOT NULL DEFAULT 1.0,
            flags TEXT NOT NULL DEFAULT '[]',
            last_updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_bandwidth_ledger_session ON bandwidth_ledger(session_id)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_bandwidth_ledger_node ON bandwidth_ledger(reporting_node_id)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_bandwidth_ledger_timestamp ON bandwidth_ledger(report_timestamp DESC)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_user_accounts_earnings ON user_accounts(earnings_last_30d DESC)", ()).await?;

    tracing::info!("Added bandwidth ledger, user accounts and stream economics columns");
    Ok(())
}
