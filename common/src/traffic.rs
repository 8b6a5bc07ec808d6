//! Wire format of the per-node traffic endpoint.
//!
//! A node answers `GET /traffic` with a JSON object keyed by username, each
//! value carrying the cumulative byte counters since the node process started:
//!
//! ```json
//! { "alice": { "tx": 1000, "rx": 500 } }
//! ```

use crate::error::{CommonError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Raw counters reported by a node for one user, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficCounters {
    pub tx: u64,
    pub rx: u64,
}

impl TrafficCounters {
    pub fn new(tx: u64, rx: u64) -> Self {
        Self { tx, rx }
    }

    pub fn is_zero(&self) -> bool {
        self.tx == 0 && self.rx == 0
    }

    pub fn total(&self) -> u64 {
        self.tx.saturating_add(self.rx)
    }
}

/// Largest raw counter accepted from a node; the store keeps signed 64-bit
/// integers.
pub const MAX_COUNTER: u64 = i64::MAX as u64;

/// One scrape of a node: username -> counters.
pub type TrafficSnapshot = HashMap<String, TrafficCounters>;

/// Decode a snapshot body.
///
/// Counters must be integers in `0..=MAX_COUNTER`; anything else (strings,
/// floats, negative numbers, a top-level array) is rejected.
pub fn decode_snapshot(body: &[u8]) -> Result<TrafficSnapshot> {
    let snapshot = serde_json::from_slice::<TrafficSnapshot>(body)
        .map_err(|e| CommonError::InvalidSnapshot(e.to_string()))?;

    if let Some((username, _)) = snapshot
        .iter()
        .find(|(_, c)| c.tx > MAX_COUNTER || c.rx > MAX_COUNTER)
    {
        return Err(CommonError::InvalidSnapshot(format!(
            "counter for user {} exceeds {}",
            username, MAX_COUNTER
        )));
    }
    Ok(snapshot)
}
