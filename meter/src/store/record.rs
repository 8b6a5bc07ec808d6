use chrono::{DateTime, Utc};
use common::TrafficCounters;
use serde::Serialize;

/// A proxy node whose traffic endpoint is scraped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub id: i64,
    pub name: String,
    pub address: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewNode {
    pub name: String,
    pub address: String,
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserAccount {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub enabled: bool,
    /// Bytes; 0 means unlimited
    pub traffic_limit: u64,
    pub auto_disable_on_limit: bool,
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    /// Whether the account is subject to automatic suspension.
    pub fn has_enforced_limit(&self) -> bool {
        self.traffic_limit > 0 && self.auto_disable_on_limit
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub traffic_limit: u64,
    pub auto_disable_on_limit: bool,
}

/// Accumulated traffic of one user on one node.
///
/// `lifetime_*` never decreases; `last_observed_*` mirrors the node's raw
/// counters at the previous scrape and is what restart detection compares
/// against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterRecord {
    pub node_id: i64,
    pub username: String,
    pub lifetime_tx: u64,
    pub lifetime_rx: u64,
    pub last_observed_tx: u64,
    pub last_observed_rx: u64,
    pub updated_at: DateTime<Utc>,
}

impl CounterRecord {
    pub fn last_observed(&self) -> TrafficCounters {
        TrafficCounters::new(self.last_observed_tx, self.last_observed_rx)
    }

    pub fn lifetime(&self) -> UsageTotals {
        UsageTotals {
            tx: self.lifetime_tx,
            rx: self.lifetime_rx,
        }
    }
}

/// Lifetime bytes summed over any number of counter records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageTotals {
    pub tx: u64,
    pub rx: u64,
}

impl UsageTotals {
    pub fn add(&mut self, other: UsageTotals) {
        self.tx = self.tx.saturating_add(other.tx);
        self.rx = self.rx.saturating_add(other.rx);
    }

    pub fn total(&self) -> u64 {
        self.tx.saturating_add(self.rx)
    }
}

/// One row of the per-node traffic report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeUsage {
    pub node_id: i64,
    pub node_name: String,
    pub username: String,
    pub tx: u64,
    pub rx: u64,
    pub updated_at: DateTime<Utc>,
}
