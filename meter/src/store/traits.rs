use super::{CounterRecord, NewNode, NewUser, Node, NodeUsage, UsageTotals, UserAccount};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Durable `(node, username)` counter table.
///
/// The collector is the only writer of lifetime and last-observed values;
/// [`CounterStore::upsert_counter`] must be a single atomic insert-or-update
/// on the key.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn find_counter(&self, node_id: i64, username: &str) -> Result<Option<CounterRecord>>;

    async fn upsert_counter(&self, record: &CounterRecord) -> Result<()>;

    /// Lifetime totals of one user summed over every node.
    async fn usage_for_user(&self, username: &str) -> Result<UsageTotals>;

    async fn usage_by_user(&self) -> Result<BTreeMap<String, UsageTotals>>;

    /// Per-node rows ordered by node id, most recently updated first.
    async fn usage_by_node(&self) -> Result<Vec<NodeUsage>>;

    /// Drop every counter of `username` on all nodes and re-enable the
    /// account, atomically. Returns the number of records removed.
    async fn reset_user_traffic(&self, username: &str) -> Result<u64>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, username: &str) -> Result<Option<UserAccount>>;

    /// Set `enabled = false` if the account is currently enabled.
    /// Returns `true` only when this call changed the flag.
    async fn disable_user(&self, username: &str) -> Result<bool>;

    async fn create_user(&self, user: NewUser) -> Result<UserAccount>;
}

#[async_trait]
pub trait NodeRegistry: Send + Sync {
    async fn enabled_nodes(&self) -> Result<Vec<Node>>;

    async fn mark_synced(&self, node_id: i64, at: DateTime<Utc>) -> Result<()>;

    async fn create_node(&self, node: NewNode) -> Result<Node>;

    async fn set_node_enabled(&self, node_id: i64, enabled: bool) -> Result<()>;
}
