//! Cluster module - coordinates the distributed scheduler
//!
//! The agent runtime is the core coordinator that:
//! - Heartbeats this node and maintains the live-node view
//! - Recomputes and publishes the partition table when this node is master
//! - Runs the probe sweep over this node's assigned monitors
//! - Feeds results through the state tracker and into notification dispatch
//!
//! All runtime state lives in an explicit struct constructed once per
//! process; there are no ambient statics.

pub mod liveness;
pub mod partition;


pub use liveness::{LivenessManager, NodeIdentity};
pub use partition::partition;

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::database::models::{Alert, Monitor};
use crate::database::{
    ConfigRepository, HistoryRepository, LibsqlRepository, RegistryStore, initialize_database,
};
use crate::monitoring::types::{CheckResult, StatusTransition};
use crate::monitoring::{ProbeExecutor, StateTracker, SweepPlanner};
use crate::notify::{AlertMessage, Dispatcher};
use crate::pool::LibsqlPool;

/// Main runtime for one agent node
pub struct AgentRuntime {
    config: Arc<Config>,
    config_repo: Arc<dyn ConfigRepository>,
    registry: Arc<dyn RegistryStore>,
    history: Arc<dyn HistoryRepository>,
    executor: Arc<ProbeExecutor>,
    liveness: Arc<LivenessManager>,
    dispatcher: Arc<Dispatcher>,
    tracker: StateTracker,
    planner: SweepPlanner,
    probe_semaphore: Arc<Semaphore>,
    /// Cache of the monitor set from the last successful config read,
    /// keyed by monitor ID
    monitor_cache: HashMap<i64, Monitor>,
    /// Last partition table this node published as master; kept so sticky
    /// rebalancing and publish failures both fall back to it
    last_partition: HashMap<String, Vec<i64>>,
}

impl AgentRuntime {
    /// Create and run an agent runtime until the process exits
    pub async fn start(config: Config, pool: LibsqlPool) -> Result<()> {
        let mut runtime = Self::new(config, pool).await?;
        runtime.run().await
    }

    async fn new(config: Config, pool: LibsqlPool) -> Result<Self> {
        let config = Arc::new(config);

        // Initialize database schema
        info!("Initializing database schema...");
        let conn = pool.get().await?;
        initialize_database(&conn).await?;
        drop(conn);

        let repository = Arc::new(LibsqlRepository::new_from_pool(pool));
        let config_repo: Arc<dyn ConfigRepository> = repository.clone();
        let registry: Arc<dyn RegistryStore> = repository.clone();
        let history: Arc<dyn HistoryRepository> = repository;

        let identity = resolve_identity(&config);
        info!("Node ID: {} (hostname {})", identity.node_id, identity.hostname);

        let liveness = Arc::new(LivenessManager::new(
            registry.clone(),
            identity,
            config.scheduler.heartbeat_seconds,
        ));

        let executor = Arc::new(ProbeExecutor::new(config.scheduler.default_timeout_seconds)?);

        let dispatcher = Arc::new(
            Dispatcher::new(
                config.notify.retry_attempts,
                Duration::from_millis(config.notify.backoff_base_ms),
            )
            .with_default_channels(config.notify.send_timeout_seconds)?,
        );

        let probe_semaphore = Arc::new(Semaphore::new(config.scheduler.max_concurrent_probes.max(1)));

        Ok(Self {
            config,
            config_repo,
            registry,
            history,
            executor,
            liveness,
            dispatcher,
            tracker: StateTracker::new(),
            planner: SweepPlanner::new(),
            probe_semaphore,
            monitor_cache: HashMap::new(),
            last_partition: HashMap::new(),
        })
    }

    /// Run the heartbeat, partition and sweep loops until shutdown
    async fn run(&mut self) -> Result<()> {
        info!("Starting agent runtime...");

        // Rebuild tracker state so a restart does not fire spurious
        // transition notifications
        match self.registry.load_statuses().await {
            Ok(statuses) => {
                info!("Restored {} persisted monitor statuses", statuses.len());
                self.tracker = StateTracker::from_persisted(statuses);
            }
            Err(e) => {
                warn!("Failed to load persisted monitor statuses, starting from unknown: {}", e);
            }
        }

        // Seed sticky rebalancing from the table already in force, so a
        // newly elected master does not reshuffle monitors sitting on
        // live nodes
        match self.registry.assignments().await {
            Ok(table) => {
                if !table.is_empty() {
                    info!("Loaded published partition table covering {} nodes", table.len());
                }
                self.last_partition = table;
            }
            Err(e) => {
                warn!("Failed to load published partition table: {}", e);
            }
        }

        // Register this node before the first partition cycle
        if let Err(e) = self.liveness.heartbeat().await {
            warn!("Initial heartbeat failed: {}", e);
        }
        self.liveness.refresh().await;

        let (result_tx, mut result_rx) = mpsc::channel::<CheckResult>(100);

        let mut heartbeat_tick =
            interval(Duration::from_secs(self.config.scheduler.heartbeat_seconds.max(1)));
        let mut partition_tick =
            interval(Duration::from_secs(self.config.scheduler.partition_seconds.max(1)));
        let mut sweep_tick =
            interval(Duration::from_secs(self.config.scheduler.sweep_seconds.max(1)));

        // A stalled store must not cause a burst of catch-up ticks
        heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        partition_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Agent runtime started - processing monitoring results");

        loop {
            tokio::select! {
                _ = heartbeat_tick.tick() => {
                    if let Err(e) = self.liveness.heartbeat().await {
                        warn!("Heartbeat write failed: {}", e);
                    }
                    self.liveness.refresh().await;
                }

                _ = partition_tick.tick() => {
                    if self.liveness.is_master().await {
                        self.recompute_partition().await;
                    }
                }

                _ = sweep_tick.tick() => {
                    self.run_sweep(&result_tx).await;
                }

                Some(result) = result_rx.recv() => {
                    self.process_result(result).await;
                }

                else => {
                    info!("All channels closed, shutting down agent runtime");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Recompute the partition table and publish it (master only).
    ///
    /// A publish failure leaves the previously published table in effect;
    /// the next tick retries with fresh inputs.
    async fn recompute_partition(&mut self) {
        let monitors = match self.config_repo.monitors().await {
            Ok(monitors) => monitors,
            Err(e) => {
                warn!("Skipping partition recompute, monitor list unavailable: {}", e);
                return;
            }
        };

        let live_nodes = self.liveness.live_nodes().await;
        let monitor_ids: Vec<i64> = monitors.iter().map(|m| m.id).collect();

        let table = partition(&monitor_ids, &live_nodes, &self.last_partition);

        match self.registry.publish_assignments(&table).await {
            Ok(()) => {
                debug!(
                    "Published partition table: {} monitors across {} nodes",
                    monitor_ids.len(),
                    live_nodes.len()
                );
                self.last_partition = table;
            }
            Err(e) => {
                warn!("Failed to publish partition table, previous assignment stays: {}", e);
            }
        }
    }

    /// One probe sweep: refresh configuration, read this node's assignment
    /// and dispatch every monitor that is due
    async fn run_sweep(&mut self, result_tx: &mpsc::Sender<CheckResult>) {
        match self.config_repo.is_execution_disabled().await {
            Ok(false) => {}
            Ok(true) => {
                debug!("Monitor execution is disabled, skipping sweep");
                return;
            }
            Err(e) => {
                warn!("Skipping sweep, kill switch unavailable: {}", e);
                return;
            }
        }

        let monitors = match self.config_repo.monitors().await {
            Ok(monitors) => monitors,
            Err(e) => {
                warn!("Skipping sweep, monitor configuration unavailable: {}", e);
                return;
            }
        };

        self.monitor_cache = monitors
            .into_iter()
            .filter(|m| match crate::monitoring::validation::validate_monitor(m) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Skipping misconfigured monitor {} ({}): {}", m.id, m.name, e);
                    false
                }
            })
            .map(|m| (m.id, m))
            .collect();
        let known_ids: HashSet<i64> = self.monitor_cache.keys().copied().collect();
        self.tracker.retain_monitors(&known_ids);

        let assigned = match self.registry.assignments_for(self.liveness.node_id()).await {
            Ok(assigned) => assigned,
            Err(e) => {
                warn!("Skipping sweep, assignment table unavailable: {}", e);
                return;
            }
        };

        let assigned_set: HashSet<i64> = assigned.iter().copied().collect();
        self.planner.retain_assigned(&assigned_set);

        let due = self.planner.plan(&assigned, &self.monitor_cache, Instant::now());
        if due.is_empty() {
            return;
        }

        debug!("Sweep: {} assigned, {} due", assigned.len(), due.len());

        for (monitor, in_flight) in due {
            let executor = self.executor.clone();
            let semaphore = self.probe_semaphore.clone();
            let result_tx = result_tx.clone();

            tokio::spawn(async move {
                // Holds the in-flight flag for the whole probe, including
                // time spent waiting on the concurrency permit
                let _in_flight = in_flight;

                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };

                let result = executor.execute_check(&monitor).await;

                if let Err(e) = result_tx.send(result).await {
                    error!("Failed to send check result: {}", e);
                }
            });
        }
    }

    /// Apply one check result: update tracker state, persist, and fan out
    /// a notification if a transition edge fired
    async fn process_result(&mut self, result: CheckResult) {
        info!(
            "Monitor {} - Status: {} - Latency: {:?}ms",
            result.monitor_id, result.status, result.latency_ms
        );

        // History writes are fire-and-forget, off the scheduling path
        let history = self.history.clone();
        let history_row = result.clone();
        tokio::spawn(async move {
            if let Err(e) = history.save_result(&history_row).await {
                warn!("Failed to save check result: {}", e);
            }
        });

        let Some(monitor) = self.monitor_cache.get(&result.monitor_id).cloned() else {
            debug!("Result for unknown monitor {}, ignoring", result.monitor_id);
            return;
        };

        let transition = self.tracker.apply(&monitor, &result);

        // Status writes happen inline, in result order, so a stale
        // snapshot can never overwrite a newer one
        if let Some(snapshot) = self.tracker.snapshot(monitor.id) {
            if let Err(e) = self.registry.save_status(&snapshot).await {
                warn!("Failed to persist monitor status: {}", e);
            }
        }

        if let Some(transition) = transition {
            self.dispatch_transition(&monitor, transition, result.error_message.clone());
        }
    }

    /// Spawn notification fan-out for a transition so slow channels never
    /// delay result processing
    fn dispatch_transition(
        &self,
        monitor: &Monitor,
        transition: StatusTransition,
        detail: Option<String>,
    ) {
        info!(
            "Monitor {} ({} check) transitioned: {}",
            monitor.id,
            monitor.spec.kind(),
            transition
        );

        let message = AlertMessage::new(
            monitor.id,
            monitor.name.clone(),
            monitor.spec.target(),
            transition,
            detail,
        );

        let config_repo = self.config_repo.clone();
        let history = self.history.clone();
        let dispatcher = self.dispatcher.clone();

        tokio::spawn(async move {
            let alert = Alert {
                monitor_id: message.monitor_id,
                transition: message.transition,
                message: message.body.clone(),
                created_at: message.timestamp,
            };
            if let Err(e) = history.save_alert(&alert).await {
                warn!("Failed to persist alert: {}", e);
            }

            let targets = match config_repo.notification_targets(message.monitor_id).await {
                Ok(targets) => targets,
                Err(e) => {
                    warn!(
                        "Cannot load notification targets for monitor {}: {}",
                        message.monitor_id, e
                    );
                    return;
                }
            };

            if targets.is_empty() {
                debug!("Monitor {} has no notification targets", message.monitor_id);
                return;
            }

            let delivered = dispatcher.dispatch(&targets, &message).await;
            info!(
                "Dispatched {} notification for monitor {}: {}/{} channels delivered",
                message.transition,
                message.monitor_id,
                delivered,
                targets.len()
            );
        });
    }
}

/// Resolve this node's identity from config, with generated fallbacks
fn resolve_identity(config: &Config) -> NodeIdentity {
    let node_id = config
        .node
        .id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let hostname = config
        .node
        .hostname
        .clone()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "unknown".to_string());

    NodeIdentity { node_id, hostname, region: config.node.region.clone() }
}
