//! Periodic traffic collection across the node fleet.
//!
//! Each tick scrapes every enabled node concurrently, then folds each
//! snapshot into the counter store one node at a time. A node that cannot be
//! scraped is skipped for the tick; a counter that cannot be written is
//! skipped for the tick. Neither stops the other nodes or the loop.

use crate::error::{FetchError, MeterError, Result};
use crate::fetcher::TrafficSource;
use crate::quota::{QuotaEnforcer, QuotaOutcome};
use crate::reconcile::{Observation, reconcile};
use crate::store::{CounterStore, Node, NodeRegistry};
use chrono::{DateTime, Utc};
use common::{TrafficCounters, TrafficSnapshot};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeFailure {
    pub node_id: i64,
    pub node_name: String,
    pub error: String,
}

/// Outcome of one collection tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub nodes_polled: usize,
    pub nodes_synced: usize,
    pub failures: Vec<NodeFailure>,
    pub records_created: usize,
    pub records_updated: usize,
    pub restarts_detected: usize,
    pub store_failures: usize,
    pub users_disabled: Vec<String>,
}

pub struct TrafficCollector {
    nodes: Arc<dyn NodeRegistry>,
    counters: Arc<dyn CounterStore>,
    source: Arc<dyn TrafficSource>,
    quota: QuotaEnforcer,
    // Held for a whole tick so two ticks never interleave writes to a key.
    tick_lock: Mutex<()>,
}

impl TrafficCollector {
    pub fn new(
        nodes: Arc<dyn NodeRegistry>,
        counters: Arc<dyn CounterStore>,
        source: Arc<dyn TrafficSource>,
        quota: QuotaEnforcer,
    ) -> Self {
        Self {
            nodes,
            counters,
            source,
            quota,
            tick_lock: Mutex::new(()),
        }
    }

    /// Run one tick. Fails only when the node list itself cannot be read.
    #[instrument(skip(self))]
    pub async fn collect_once(&self) -> Result<TickReport> {
        let _tick = self.tick_lock.lock().await;
        let mut report = TickReport::default();

        let nodes = self.nodes.enabled_nodes().await?;
        if nodes.is_empty() {
            info!("No enabled nodes found");
            return Ok(report);
        }
        report.nodes_polled = nodes.len();

        let fetches = nodes.iter().map(|node| self.source.fetch(node));
        let results = futures::future::join_all(fetches).await;

        for (node, result) in nodes.iter().zip(results) {
            match result {
                Ok(snapshot) => {
                    self.reconcile_node(node, snapshot, &mut report).await;
                    report.nodes_synced += 1;
                }
                Err(e) => {
                    log_fetch_failure(node, &e);
                    report.failures.push(NodeFailure {
                        node_id: node.id,
                        node_name: node.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Traffic collection completed: {}/{} nodes synced, {} created, {} updated, {} restarts, {} write failures",
            report.nodes_synced,
            report.nodes_polled,
            report.records_created,
            report.records_updated,
            report.restarts_detected,
            report.store_failures
        );
        Ok(report)
    }

    /// Collect every `interval` until `shutdown` is cancelled. The first
    /// tick fires one interval after start.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Started periodic traffic collection (every {:?})", interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Traffic collection stopped");
                    break;
                }
                _ = ticker.tick() => {
                    debug!("Starting traffic collection from all nodes");
                    if let Err(e) = self.collect_once().await {
                        error!("Traffic collection tick failed: {}", e);
                    }
                }
            }
        }
    }

    async fn reconcile_node(
        &self,
        node: &Node,
        snapshot: TrafficSnapshot,
        report: &mut TickReport,
    ) {
        let now = Utc::now();

        for (username, counters) in snapshot {
            if counters.is_zero() {
                continue;
            }
            match self.reconcile_user(node, &username, counters, now).await {
                Ok(Observation::First) => report.records_created += 1,
                Ok(Observation::Steady) => report.records_updated += 1,
                Ok(Observation::Restart) => {
                    report.records_updated += 1;
                    report.restarts_detected += 1;
                }
                Err(e) => {
                    warn!("{}", e);
                    report.store_failures += 1;
                    continue;
                }
            }

            match self.quota.enforce(&username).await {
                Ok(QuotaOutcome::Disabled { .. }) => report.users_disabled.push(username),
                Ok(_) => {}
                Err(e) => warn!("Quota check for user {} failed: {}", username, e),
            }
        }

        if let Err(e) = self.nodes.mark_synced(node.id, now).await {
            warn!("Error updating last_sync_at for node {}: {}", node.name, e);
        }
    }

    async fn reconcile_user(
        &self,
        node: &Node,
        username: &str,
        current: TrafficCounters,
        now: DateTime<Utc>,
    ) -> Result<Observation> {
        let store_write = |e: MeterError| MeterError::StoreWrite {
            node_id: node.id,
            username: username.to_string(),
            reason: e.to_string(),
        };

        let previous = self
            .counters
            .find_counter(node.id, username)
            .await
            .map_err(store_write)?;
        let next = reconcile(node.id, username, previous.as_ref(), current, now);

        self.counters
            .upsert_counter(&next.record)
            .await
            .map_err(store_write)?;

        if next.observation == Observation::Restart {
            info!(
                "Detected restart of node {} for user {}, adding increment: tx={}, rx={}",
                node.name, username, current.tx, current.rx
            );
        }
        debug!(
            "Updated traffic for user {} on node {}: total_tx={}, total_rx={} (current: {}/{})",
            username,
            node.name,
            next.record.lifetime_tx,
            next.record.lifetime_rx,
            current.tx,
            current.rx
        );
        Ok(next.observation)
    }
}

fn log_fetch_failure(node: &Node, e: &FetchError) {
    match e {
        FetchError::Timeout(_) => warn!(
            "Error fetching traffic from node {} ({}): {} - please verify node address is accessible",
            node.name, node.address, e
        ),
        _ => warn!(
            "Error fetching traffic from node {} ({}): {}",
            node.name, node.address, e
        ),
    }
}
