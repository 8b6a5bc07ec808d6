//! Persistence for users, nodes and per-node traffic counters.
//!
//! The collector, quota enforcer and API only see the traits in [`traits`];
//! [`SqlStore`] backs them with SQLite and [`MemoryStore`] is the in-process
//! implementation used by tests.

mod memory;
mod record;
mod sql;
mod traits;

pub use memory::MemoryStore;
pub use record::{CounterRecord, NewNode, NewUser, Node, NodeUsage, UsageTotals, UserAccount};
pub use sql::SqlStore;
pub use traits::{CounterStore, NodeRegistry, UserDirectory};
