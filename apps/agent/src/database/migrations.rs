use anyhow::Result;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 1;

/// Run database migrations
///
/// This is the single source of truth for the agent-side schema. The
/// configuration API writes monitors and notification targets; the agent
/// owns the registry, assignment, status, result and alert tables.
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
        record_migration(conn, 1, "Initial schema").await?;
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

/// Get current schema version from database
async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query("SELECT MAX(version) FROM schema_migrations", ())
        .await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

/// Record that a migration was applied
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

async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitors (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            spec TEXT NOT NULL,
            interval_seconds INTEGER NOT NULL DEFAULT 60,
            timeout_seconds INTEGER NOT NULL DEFAULT 10,
            retries INTEGER NOT NULL DEFAULT 3,
            paused INTEGER NOT NULL DEFAULT 0,
            region TEXT,
            group_id INTEGER
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS agent_nodes (
            node_id TEXT PRIMARY KEY,
            hostname TEXT NOT NULL,
            region TEXT,
            last_heartbeat INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS task_assignments (
            node_id TEXT NOT NULL,
            monitor_id INTEGER NOT NULL,
            PRIMARY KEY (node_id, monitor_id)
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitor_status (
            monitor_id INTEGER PRIMARY KEY,
            last_status TEXT NOT NULL,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notification_targets (
            id INTEGER PRIMARY KEY,
            channel TEXT NOT NULL,
            destination TEXT NOT NULL,
            monitor_id INTEGER,
            group_id INTEGER
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS check_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            monitor_id INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,
            status TEXT NOT NULL,
            latency_ms INTEGER,
            status_code INTEGER,
            error_message TEXT
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_check_results_monitor
         ON check_results (monitor_id, timestamp)",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS alerts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            monitor_id INTEGER NOT NULL,
            transition TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        (),
    )
    .await?;

    Ok(())
}
