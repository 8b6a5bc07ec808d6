use crate::auth::hash_password;
use crate::collector::TrafficCollector;
use crate::error::Result;
use crate::store::{CounterStore, NewNode, NewUser, NodeRegistry, UserDirectory};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "meter")]
#[command(author, version, about = "Traffic metering for a proxy node fleet", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "meter.toml")]
    pub config: String,

    /// Override API listen address
    #[arg(long)]
    pub api_addr: Option<String>,

    /// Override database path
    #[arg(long)]
    pub database_path: Option<String>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override number of runtime worker threads
    #[arg(long)]
    pub runtime_threads: Option<usize>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the API server and periodic traffic collection (default)
    Serve,

    /// Create a user account
    AddUser {
        username: String,
        password: String,
        /// Traffic limit in bytes; 0 means unlimited
        #[arg(long, default_value_t = 0)]
        traffic_limit: u64,
        /// Keep the account enabled when the limit is reached
        #[arg(long)]
        no_auto_disable: bool,
    },

    /// Register a proxy node to collect traffic from
    AddNode {
        name: String,
        /// host:port of the node's traffic endpoint
        address: String,
        secret: String,
    },

    /// Enable or disable collection from a node
    SetNodeEnabled {
        id: i64,
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },

    /// Clear a user's traffic on every node and re-enable the account
    ResetTraffic { username: String },

    /// Run one collection tick and print the report as JSON
    Collect,

    /// Write the effective configuration (file, environment and flags) back
    /// to the config path
    InitConfig,
}

/// Execute a one-shot administrative command and return the line to print.
pub async fn run_admin_command<S>(
    command: Command,
    store: &S,
    collector: &TrafficCollector,
) -> Result<String>
where
    S: CounterStore + UserDirectory + NodeRegistry,
{
    match command {
        Command::Serve | Command::InitConfig => Ok(String::new()),
        Command::AddUser {
            username,
            password,
            traffic_limit,
            no_auto_disable,
        } => {
            let user = store
                .create_user(NewUser {
                    username,
                    password_hash: hash_password(&password),
                    traffic_limit,
                    auto_disable_on_limit: !no_auto_disable,
                })
                .await?;
            Ok(format!("Added user {} (id {})", user.username, user.id))
        }
        Command::AddNode {
            name,
            address,
            secret,
        } => {
            let node = store
                .create_node(NewNode {
                    name,
                    address,
                    secret,
                })
                .await?;
            Ok(format!(
                "Added node {} at {} (id {})",
                node.name, node.address, node.id
            ))
        }
        Command::SetNodeEnabled { id, enabled } => {
            store.set_node_enabled(id, enabled).await?;
            Ok(format!(
                "Node {} {}",
                id,
                if enabled { "enabled" } else { "disabled" }
            ))
        }
        Command::ResetTraffic { username } => {
            let removed = store.reset_user_traffic(&username).await?;
            Ok(format!(
                "Traffic reset for user {} ({} records removed)",
                username, removed
            ))
        }
        Command::Collect => {
            let report = collector.collect_once().await?;
            Ok(serde_json::to_string_pretty(&report)?)
        }
    }
}
