use super::{
    CounterRecord, CounterStore, NewNode, NewUser, Node, NodeRegistry, NodeUsage, UsageTotals,
    UserAccount, UserDirectory,
};
use crate::entity::{node, traffic_stat, user};
use crate::error::{MeterError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Set, SqlErr, Statement, TransactionTrait,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, instrument};

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT UNIQUE NOT NULL,
        password_hash TEXT NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT 1,
        traffic_limit INTEGER NOT NULL DEFAULT 0,
        auto_disable_on_limit BOOLEAN NOT NULL DEFAULT 1,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL,
        address TEXT NOT NULL,
        secret TEXT NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT 1,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        last_sync_at DATETIME
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS traffic_stats (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        node_id INTEGER NOT NULL,
        username TEXT NOT NULL,
        tx INTEGER NOT NULL DEFAULT 0,
        rx INTEGER NOT NULL DEFAULT 0,
        last_tx INTEGER NOT NULL DEFAULT 0,
        last_rx INTEGER NOT NULL DEFAULT 0,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(node_id, username),
        FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_traffic_stats_username ON traffic_stats(username)",
];

/// SQLite-backed store shared by the API handlers and the collector.
pub struct SqlStore {
    db: DatabaseConnection,
}

impl SqlStore {
    #[instrument(skip(database_path))]
    pub async fn open<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let database_path = database_path.as_ref();

        // Create parent directory for database if it doesn't exist
        if let Some(parent) = database_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let database_url = format!("sqlite:{}?mode=rwc", database_path.display());
        let db = Database::connect(&database_url).await?;

        for sql in SCHEMA {
            db.execute(Statement::from_string(
                db.get_database_backend(),
                sql.to_string(),
            ))
            .await?;
        }

        info!("Connected to SQLite database: {}", database_path.display());

        Ok(Self { db })
    }
}

#[async_trait]
impl CounterStore for SqlStore {
    async fn find_counter(&self, node_id: i64, username: &str) -> Result<Option<CounterRecord>> {
        let row = traffic_stat::Entity::find()
            .filter(traffic_stat::Column::NodeId.eq(node_id))
            .filter(traffic_stat::Column::Username.eq(username))
            .one(&self.db)
            .await?;
        Ok(row.map(counter_from_row))
    }

    async fn upsert_counter(&self, record: &CounterRecord) -> Result<()> {
        let now = record.updated_at.naive_utc();
        let row = traffic_stat::ActiveModel {
            node_id: Set(record.node_id),
            username: Set(record.username.clone()),
            tx: Set(to_db(record.lifetime_tx)),
            rx: Set(to_db(record.lifetime_rx)),
            last_tx: Set(to_db(record.last_observed_tx)),
            last_rx: Set(to_db(record.last_observed_rx)),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        traffic_stat::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([
                    traffic_stat::Column::NodeId,
                    traffic_stat::Column::Username,
                ])
                .update_columns([
                    traffic_stat::Column::Tx,
                    traffic_stat::Column::Rx,
                    traffic_stat::Column::LastTx,
                    traffic_stat::Column::LastRx,
                    traffic_stat::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    async fn usage_for_user(&self, username: &str) -> Result<UsageTotals> {
        let rows = traffic_stat::Entity::find()
            .filter(traffic_stat::Column::Username.eq(username))
            .all(&self.db)
            .await?;

        let mut totals = UsageTotals::default();
        for row in rows {
            totals.add(counter_from_row(row).lifetime());
        }
        Ok(totals)
    }

    async fn usage_by_user(&self) -> Result<BTreeMap<String, UsageTotals>> {
        let rows = traffic_stat::Entity::find().all(&self.db).await?;

        let mut by_user: BTreeMap<String, UsageTotals> = BTreeMap::new();
        for row in rows {
            let record = counter_from_row(row);
            by_user
                .entry(record.username.clone())
                .or_default()
                .add(record.lifetime());
        }
        Ok(by_user)
    }

    async fn usage_by_node(&self) -> Result<Vec<NodeUsage>> {
        let rows = traffic_stat::Entity::find()
            .find_also_related(node::Entity)
            .all(&self.db)
            .await?;

        let mut usage: Vec<NodeUsage> = rows
            .into_iter()
            .filter_map(|(stat, node)| {
                let node = node?;
                let record = counter_from_row(stat);
                Some(NodeUsage {
                    node_id: node.id,
                    node_name: node.name,
                    username: record.username,
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

    #[instrument(skip(self))]
    async fn reset_user_traffic(&self, username: &str) -> Result<u64> {
        let txn = self.db.begin().await?;

        let account = user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(&txn)
            .await?
            .ok_or_else(|| MeterError::UserNotFound(username.to_string()))?;

        let deleted = traffic_stat::Entity::delete_many()
            .filter(traffic_stat::Column::Username.eq(username))
            .exec(&txn)
            .await?;

        user::Entity::update_many()
            .col_expr(user::Column::Enabled, Expr::value(true))
            .filter(user::Column::Id.eq(account.id))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        info!(
            "Traffic reset for user {}: {} record(s) removed",
            username, deleted.rows_affected
        );
        Ok(deleted.rows_affected)
    }
}

#[async_trait]
impl UserDirectory for SqlStore {
    async fn find_user(&self, username: &str) -> Result<Option<UserAccount>> {
        let row = user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(&self.db)
            .await?;
        Ok(row.map(user_from_row))
    }

    async fn disable_user(&self, username: &str) -> Result<bool> {
        let result = user::Entity::update_many()
            .col_expr(user::Column::Enabled, Expr::value(false))
            .filter(user::Column::Username.eq(username))
            .filter(user::Column::Enabled.eq(true))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    #[instrument(skip(self, new_user), fields(username = %new_user.username))]
    async fn create_user(&self, new_user: NewUser) -> Result<UserAccount> {
        let username = new_user.username.clone();
        let row = user::ActiveModel {
            username: Set(new_user.username),
            password_hash: Set(new_user.password_hash),
            enabled: Set(true),
            traffic_limit: Set(to_db(new_user.traffic_limit)),
            auto_disable_on_limit: Set(new_user.auto_disable_on_limit),
            created_at: Set(Utc::now().naive_utc()),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => MeterError::UserExists(username),
            _ => MeterError::Database(e),
        })?;

        info!("User {} added", row.username);
        Ok(user_from_row(row))
    }
}

#[async_trait]
impl NodeRegistry for SqlStore {
    async fn enabled_nodes(&self) -> Result<Vec<Node>> {
        let rows = node::Entity::find()
            .filter(node::Column::Enabled.eq(true))
            .order_by_asc(node::Column::Id)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(node_from_row).collect())
    }

    async fn mark_synced(&self, node_id: i64, at: DateTime<Utc>) -> Result<()> {
        let result = node::Entity::update_many()
            .col_expr(node::Column::LastSyncAt, Expr::value(at.naive_utc()))
            .filter(node::Column::Id.eq(node_id))
            .exec(&self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(MeterError::NodeNotFound(node_id));
        }
        Ok(())
    }

    #[instrument(skip(self, new_node), fields(name = %new_node.name))]
    async fn create_node(&self, new_node: NewNode) -> Result<Node> {
        let row = node::ActiveModel {
            name: Set(new_node.name),
            address: Set(new_node.address),
            secret: Set(new_node.secret),
            enabled: Set(true),
            created_at: Set(Utc::now().naive_utc()),
            last_sync_at: Set(None),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        info!("Node {} ({}) added", row.name, row.address);
        Ok(node_from_row(row))
    }

    async fn set_node_enabled(&self, node_id: i64, enabled: bool) -> Result<()> {
        let result = node::Entity::update_many()
            .col_expr(node::Column::Enabled, Expr::value(enabled))
            .filter(node::Column::Id.eq(node_id))
            .exec(&self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(MeterError::NodeNotFound(node_id));
        }
        Ok(())
    }
}

// SQLite integers are signed. Raw counters are bounded on decode, so only
// saturated lifetime totals can reach the pin.
fn to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn counter_from_row(row: traffic_stat::Model) -> CounterRecord {
    CounterRecord {
        node_id: row.node_id,
        username: row.username,
        lifetime_tx: from_db(row.tx),
        lifetime_rx: from_db(row.rx),
        last_observed_tx: from_db(row.last_tx),
        last_observed_rx: from_db(row.last_rx),
        updated_at: row.updated_at.and_utc(),
    }
}

fn user_from_row(row: user::Model) -> UserAccount {
    UserAccount {
        id: row.id,
        username: row.username,
        password_hash: row.password_hash,
        enabled: row.enabled,
        traffic_limit: from_db(row.traffic_limit),
        auto_disable_on_limit: row.auto_disable_on_limit,
        created_at: row.created_at.and_utc(),
    }
}

fn node_from_row(row: node::Model) -> Node {
    Node {
        id: row.id,
        name: row.name,
        address: row.address,
        secret: row.secret,
        enabled: row.enabled,
        created_at: row.created_at.and_utc(),
        last_sync_at: row.last_sync_at.map(|at| at.and_utc()),
    }
}
