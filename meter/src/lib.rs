//! Traffic metering for a fleet of proxy nodes.
//!
//! The collector scrapes each node's raw per-user counters, folds them into
//! restart-proof lifetime totals and suspends accounts that exceed their
//! quota. An HTTP API exposes authentication and traffic reports.

pub mod api;
pub mod auth;
pub mod cli;
pub mod collector;
pub mod config;
pub mod entity;
pub mod error;
pub mod fetcher;
pub mod quota;
pub mod reconcile;
pub mod server;
pub mod store;
