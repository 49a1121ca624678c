use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, params};
use std::collections::HashMap;
use tracing::warn;

use super::models::{
    AgentNode, Alert, ChannelKind, Monitor, NotificationTarget, PersistedStatus,
};
use crate::monitoring::types::{CheckResult, MonitorStatus};
use crate::pool::{LibsqlManager, LibsqlPool};

/// Monitor and notification configuration, owned by the external
/// configuration API and read-only from the scheduler's perspective
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    /// Get all monitors
    async fn monitors(&self) -> Result<Vec<Monitor>>;

    /// Get notification targets bound to a monitor, directly or via its group
    async fn notification_targets(&self, monitor_id: i64) -> Result<Vec<NotificationTarget>>;

    /// Global kill switch, checked before each sweep
    async fn is_execution_disabled(&self) -> Result<bool>;
}

/// Cross-node shared state: node heartbeats, the partition table and the
/// persisted last-known monitor statuses
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Upsert this node's heartbeat row
    async fn upsert_heartbeat(&self, node: &AgentNode) -> Result<()>;

    /// Read all registered nodes, live or not
    async fn list_nodes(&self) -> Result<Vec<AgentNode>>;

    /// Replace the full partition table (master only)
    async fn publish_assignments(&self, assignments: &HashMap<String, Vec<i64>>) -> Result<()>;

    /// Read the monitor IDs assigned to one node
    async fn assignments_for(&self, node_id: &str) -> Result<Vec<i64>>;

    /// Read the full published partition table, so a newly elected master
    /// can stay sticky to the assignments already in force
    async fn assignments(&self) -> Result<HashMap<String, Vec<i64>>>;

    /// Load all persisted monitor statuses, for tracker rebuild on startup
    async fn load_statuses(&self) -> Result<Vec<PersistedStatus>>;

    /// Persist one monitor's last-known status
    async fn save_status(&self, status: &PersistedStatus) -> Result<()>;
}

/// Fire-and-forget persistence of results and alerts, off the critical
/// scheduling path
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    async fn save_result(&self, result: &CheckResult) -> Result<()>;

    async fn save_alert(&self, alert: &Alert) -> Result<()>;
}

/// LibSQL-backed implementation of all three repository surfaces
pub struct LibsqlRepository {
    pool: LibsqlPool,
}

impl LibsqlRepository {
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    fn i64_to_timestamp(ts: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(ts, 0).unwrap_or_default()
    }

    fn monitor_from_row(row: &libsql::Row) -> Result<Monitor> {
        let spec_json: String = row.get(2)?;
        Ok(Monitor {
            id: row.get(0)?,
            name: row.get(1)?,
            spec: serde_json::from_str(&spec_json)?,
            interval_seconds: row.get::<i64>(3)? as u64,
            timeout_seconds: row.get::<i64>(4)? as u64,
            retries: row.get::<i64>(5)? as u32,
            paused: row.get::<i64>(6)? != 0,
            region: row.get(7)?,
            group_id: row.get(8)?,
        })
    }

    /// Insert or replace a monitor row. Used by tests and the seed path;
    /// production writes come from the configuration API.
    pub async fn save_monitor(&self, monitor: &Monitor) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR REPLACE INTO monitors
             (id, name, spec, interval_seconds, timeout_seconds, retries, paused, region, group_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                monitor.id,
                monitor.name.clone(),
                serde_json::to_string(&monitor.spec)?,
                monitor.interval_seconds as i64,
                monitor.timeout_seconds as i64,
                monitor.retries as i64,
                monitor.paused as i64,
                monitor.region.clone(),
                monitor.group_id,
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn save_notification_target(&self, target: &NotificationTarget) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR REPLACE INTO notification_targets
             (id, channel, destination, monitor_id, group_id)
             VALUES (?, ?, ?, ?, ?)",
            params![
                target.id,
                target.channel.to_string(),
                target.destination.clone(),
                target.monitor_id,
                target.group_id,
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn set_execution_disabled(&self, disabled: bool) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES ('execution_disabled', ?)",
            params![if disabled { "true" } else { "false" }],
        )
        .await?;
        Ok(())
    }

    async fn write_assignment_rows(
        conn: &Connection,
        assignments: &HashMap<String, Vec<i64>>,
    ) -> Result<()> {
        conn.execute("DELETE FROM task_assignments", ()).await?;
        for (node_id, monitor_ids) in assignments {
            for monitor_id in monitor_ids {
                conn.execute(
                    "INSERT INTO task_assignments (node_id, monitor_id) VALUES (?, ?)",
                    params![node_id.clone(), *monitor_id],
                )
                .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigRepository for LibsqlRepository {
    async fn monitors(&self) -> Result<Vec<Monitor>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, spec, interval_seconds, timeout_seconds, retries, paused, region, group_id
                 FROM monitors ORDER BY id",
            )
            .await?;

        let mut rows = stmt.query(()).await?;
        let mut monitors = Vec::new();

        while let Some(row) = rows.next().await? {
            monitors.push(Self::monitor_from_row(&row)?);
        }

        Ok(monitors)
    }

    async fn notification_targets(&self, monitor_id: i64) -> Result<Vec<NotificationTarget>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT id, channel, destination, monitor_id, group_id
                 FROM notification_targets
                 WHERE monitor_id = ?1
                    OR (group_id IS NOT NULL
                        AND group_id = (SELECT group_id FROM monitors WHERE id = ?1))",
            )
            .await?;

        let mut rows = stmt.query(params![monitor_id]).await?;
        let mut targets = Vec::new();

        while let Some(row) = rows.next().await? {
            let channel_str: String = row.get(1)?;
            // The configuration API also writes channels this agent does
            // not run (e.g. email); those rows must not block delivery to
            // the channels it does
            let Some(channel) = ChannelKind::parse(&channel_str) else {
                warn!(
                    "Skipping notification target {} with unrecognized channel: {}",
                    row.get::<i64>(0)?,
                    channel_str
                );
                continue;
            };

            targets.push(NotificationTarget {
                id: row.get(0)?,
                channel,
                destination: row.get(2)?,
                monitor_id: row.get(3)?,
                group_id: row.get(4)?,
            });
        }

        Ok(targets)
    }

    async fn is_execution_disabled(&self) -> Result<bool> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT value FROM settings WHERE key = 'execution_disabled'", ())
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(value == "true")
        } else {
            Ok(false)
        }
    }
}

#[async_trait]
impl RegistryStore for LibsqlRepository {
    async fn upsert_heartbeat(&self, node: &AgentNode) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO agent_nodes (node_id, hostname, region, last_heartbeat)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (node_id) DO UPDATE SET
                 hostname = excluded.hostname,
                 region = excluded.region,
                 last_heartbeat = excluded.last_heartbeat",
            params![
                node.node_id.clone(),
                node.hostname.clone(),
                node.region.clone(),
                node.last_heartbeat.timestamp(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<AgentNode>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare("SELECT node_id, hostname, region, last_heartbeat FROM agent_nodes ORDER BY node_id")
            .await?;

        let mut rows = stmt.query(()).await?;
        let mut nodes = Vec::new();

        while let Some(row) = rows.next().await? {
            let last_heartbeat: i64 = row.get(3)?;
            nodes.push(AgentNode {
                node_id: row.get(0)?,
                hostname: row.get(1)?,
                region: row.get(2)?,
                last_heartbeat: Self::i64_to_timestamp(last_heartbeat),
            });
        }

        Ok(nodes)
    }

    async fn publish_assignments(&self, assignments: &HashMap<String, Vec<i64>>) -> Result<()> {
        let conn = self.get_conn().await?;

        // Replace the whole table atomically so readers never observe a
        // half-written partition
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        if let Err(e) = Self::write_assignment_rows(&conn, assignments).await {
            let _ = conn.execute("ROLLBACK", ()).await;
            return Err(e);
        }
        conn.execute("COMMIT", ()).await?;

        Ok(())
    }

    async fn assignments_for(&self, node_id: &str) -> Result<Vec<i64>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare("SELECT monitor_id FROM task_assignments WHERE node_id = ? ORDER BY monitor_id")
            .await?;

        let mut rows = stmt.query(params![node_id]).await?;
        let mut monitor_ids = Vec::new();

        while let Some(row) = rows.next().await? {
            monitor_ids.push(row.get(0)?);
        }

        Ok(monitor_ids)
    }

    async fn assignments(&self) -> Result<HashMap<String, Vec<i64>>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare("SELECT node_id, monitor_id FROM task_assignments ORDER BY node_id, monitor_id")
            .await?;

        let mut rows = stmt.query(()).await?;
        let mut table: HashMap<String, Vec<i64>> = HashMap::new();

        while let Some(row) = rows.next().await? {
            let node_id: String = row.get(0)?;
            table.entry(node_id).or_default().push(row.get(1)?);
        }

        Ok(table)
    }

    async fn load_statuses(&self) -> Result<Vec<PersistedStatus>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare("SELECT monitor_id, last_status, consecutive_failures FROM monitor_status")
            .await?;

        let mut rows = stmt.query(()).await?;
        let mut statuses = Vec::new();

        while let Some(row) = rows.next().await? {
            let status_str: String = row.get(1)?;
            statuses.push(PersistedStatus {
                monitor_id: row.get(0)?,
                last_status: MonitorStatus::parse(&status_str),
                consecutive_failures: row.get::<i64>(2)? as u32,
            });
        }

        Ok(statuses)
    }

    async fn save_status(&self, status: &PersistedStatus) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR REPLACE INTO monitor_status
             (monitor_id, last_status, consecutive_failures, updated_at)
             VALUES (?, ?, ?, ?)",
            params![
                status.monitor_id,
                status.last_status.to_string(),
                status.consecutive_failures as i64,
                Utc::now().timestamp(),
            ],
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryRepository for LibsqlRepository {
    async fn save_result(&self, result: &CheckResult) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO check_results
             (monitor_id, timestamp, status, latency_ms, status_code, error_message)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                result.monitor_id,
                result.timestamp.timestamp(),
                result.status.to_string(),
                result.latency_ms.map(|v| v as i64),
                result.status_code.map(|v| v as i64),
                result.error_message.clone(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn save_alert(&self, alert: &Alert) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO alerts (monitor_id, transition, message, created_at)
             VALUES (?, ?, ?, ?)",
            params![
                alert.monitor_id,
                alert.transition.to_string(),
                alert.message.clone(),
                alert.created_at.timestamp(),
            ],
        )
        .await?;
        Ok(())
    }
}
