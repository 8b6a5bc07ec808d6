use super::{
    CounterRecord, CounterStore, NewNode, NewUser, Node, NodeRegistry, NodeUsage, UsageTotals,
    UserAccount, UserDirectory,
};
use crate::error::{MeterError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

/// Process-local store with the same semantics as [`super::SqlStore`].
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, UserAccount>>,
    nodes: RwLock<BTreeMap<i64, Node>>,
    counters: DashMap<(i64, String), CounterRecord>,
    next_id: AtomicI64,
    #[cfg(test)]
    failing_users: parking_lot::Mutex<std::collections::HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent counter write for `username` fail.
    #[cfg(test)]
    pub(crate) fn fail_writes_for(&self, username: &str) {
        self.failing_users.lock().insert(username.to_string());
    }

    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    #[cfg(test)]
    fn check_write(&self, record: &CounterRecord) -> Result<()> {
        if self.failing_users.lock().contains(&record.username) {
            return Err(MeterError::StoreWrite {
                node_id: record.node_id,
                username: record.username.clone(),
                reason: "write rejected".to_string(),
            });
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn check_write(&self, _record: &CounterRecord) -> Result<()> {
        Ok(())
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn find_counter(&self, node_id: i64, username: &str) -> Result<Option<CounterRecord>> {
        Ok(self
            .counters
            .get(&(node_id, username.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn upsert_counter(&self, record: &CounterRecord) -> Result<()> {
        self.check_write(record)?;
        self.counters
            .insert((record.node_id, record.username.clone()), record.clone());
        Ok(())
    }

    async fn usage_for_user(&self, username: &str) -> Result<UsageTotals> {
        let mut totals = UsageTotals::default();
        for entry in self.counters.iter() {
            if entry.key().1 == username {
                totals.add(entry.value().lifetime());
            }
        }
        Ok(totals)
    }

    async fn usage_by_user(&self) -> Result<BTreeMap<String, UsageTotals>> {
        let mut by_user: BTreeMap<String, UsageTotals> = BTreeMap::new();
        for entry in self.counters.iter() {
            by_user
                .entry(entry.key().1.clone())
                .or_default()
                .add(entry.value().lifetime());
        }
        Ok(by_user)
    }

    async fn usage_by_node(&self) -> Result<Vec<NodeUsage>> {
        let nodes = self.nodes.read();
        let mut usage: Vec<NodeUsage> = self
            .counters
            .iter()
            .filter_map(|entry| {
                let record = entry.value();
                let node = nodes.get(&record.node_id)?;
                Some(NodeUsage {
                    node_id: node.id,
                    node_name: node.name.clone(),
                    username: record.username.clone(),
                    tx: record.lifetime_tx,
                    rx: record.lifetime_rx,
                    updated_at: record.updated_at,
                })
            })
            .collect();
        usage.sort_by(|a, b| {
            a.node_id
                .cmp(&b.node_id)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });
        Ok(usage)
    }

    async fn reset_user_traffic(&self, username: &str) -> Result<u64> {
        // Holding the user table lock keeps the delete and re-enable together.
        let mut users = self.users.write();
        let account = users
            .get_mut(username)
            .ok_or_else(|| MeterError::UserNotFound(username.to_string()))?;

        let before = self.counters.len();
        self.counters.retain(|(_, name), _| name != username);
        let removed = before.saturating_sub(self.counters.len());

        account.enabled = true;
        Ok(removed as u64)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_user(&self, username: &str) -> Result<Option<UserAccount>> {
        Ok(self.users.read().get(username).cloned())
    }

    async fn disable_user(&self, username: &str) -> Result<bool> {
        let mut users = self.users.write();
        match users.get_mut(username) {
            Some(account) if account.enabled => {
                account.enabled = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_user(&self, new_user: NewUser) -> Result<UserAccount> {
        let mut users = self.users.write();
        if users.contains_key(&new_user.username) {
            return Err(MeterError::UserExists(new_user.username));
        }
        let account = UserAccount {
            id: self.next_id(),
            username: new_user.username,
            password_hash: new_user.password_hash,
            enabled: true,
            traffic_limit: new_user.traffic_limit,
            auto_disable_on_limit: new_user.auto_disable_on_limit,
            created_at: Utc::now(),
        };
        users.insert(account.username.clone(), account.clone());
        Ok(account)
    }
}

#[async_trait]
impl NodeRegistry for MemoryStore {
    async fn enabled_nodes(&self) -> Result<Vec<Node>> {
        Ok(self
            .nodes
            .read()
            .values()
            .filter(|node| node.enabled)
            .cloned()
            .collect())
    }

    async fn mark_synced(&self, node_id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(&node_id)
            .ok_or(MeterError::NodeNotFound(node_id))?;
        node.last_sync_at = Some(at);
        Ok(())
    }

    async fn create_node(&self, new_node: NewNode) -> Result<Node> {
        let node = Node {
            id: self.next_id(),
            name: new_node.name,
            address: new_node.address,
            secret: new_node.secret,
            enabled: true,
            created_at: Utc::now(),
            last_sync_at: None,
        };
        self.nodes.write().insert(node.id, node.clone());
        Ok(node)
    }

    async fn set_node_enabled(&self, node_id: i64, enabled: bool) -> Result<()> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(&node_id)
            .ok_or(MeterError::NodeNotFound(node_id))?;
        node.enabled = enabled;
        Ok(())
    }
}
