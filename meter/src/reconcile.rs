//! Folding a node's raw counters into lifetime totals.
//!
//! Nodes report counters that grow from zero since their process started.
//! A drop in either counter relative to the previous scrape means the node
//! restarted, so the whole current value is new traffic. Traffic between the
//! last successful scrape and the restart is lost; the poll interval bounds
//! that window.

use crate::store::CounterRecord;
use chrono::{DateTime, Utc};
use common::TrafficCounters;

/// How the previous state of a key related to the new sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// No record existed; the sample becomes the baseline.
    First,
    /// Counters did not go backwards; the difference was added.
    Steady,
    /// At least one counter went backwards; the full sample was added.
    Restart,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub record: CounterRecord,
    pub observation: Observation,
}

/// Compute the next record for `(node_id, username)` from its previous state
/// and the current raw sample.
pub fn reconcile(
    node_id: i64,
    username: &str,
    previous: Option<&CounterRecord>,
    current: TrafficCounters,
    now: DateTime<Utc>,
) -> Reconciled {
    let (lifetime_tx, lifetime_rx, observation) = match previous {
        None => (current.tx, current.rx, Observation::First),
        Some(prev) if is_restart(prev.last_observed(), current) => (
            prev.lifetime_tx.saturating_add(current.tx),
            prev.lifetime_rx.saturating_add(current.rx),
            Observation::Restart,
        ),
        Some(prev) => (
            prev.lifetime_tx
                .saturating_add(current.tx - prev.last_observed_tx),
            prev.lifetime_rx
                .saturating_add(current.rx - prev.last_observed_rx),
            Observation::Steady,
        ),
    };

    Reconciled {
        record: CounterRecord {
            node_id,
            username: username.to_string(),
            lifetime_tx,
            lifetime_rx,
            last_observed_tx: current.tx,
            last_observed_rx: current.rx,
            updated_at: now,
        },
        observation,
    }
}

// Either counter decreasing counts; equal values are a zero delta.
fn is_restart(last: TrafficCounters, current: TrafficCounters) -> bool {
    current.tx < last.tx || current.rx < last.rx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prior(lifetime: (u64, u64), last: (u64, u64)) -> CounterRecord {
        CounterRecord {
            node_id: 1,
            username: "alice".to_string(),
            lifetime_tx: lifetime.0,
            lifetime_rx: lifetime.1,
            last_observed_tx: last.0,
            last_observed_rx: last.1,
            updated_at: Utc::now(),
        }
    }

    fn step(previous: Option<&CounterRecord>, tx: u64, rx: u64) -> Reconciled {
        reconcile(1, "alice", previous, TrafficCounters::new(tx, rx), Utc::now())
    }

    #[test]
    fn first_observation_is_the_baseline() {
        let next = step(None, 1000, 500);

        assert_eq!(next.observation, Observation::First);
        assert_eq!(next.record.lifetime_tx, 1000);
        assert_eq!(next.record.lifetime_rx, 500);
        assert_eq!(next.record.last_observed(), TrafficCounters::new(1000, 500));
    }

    #[test]
    fn steady_state_adds_the_delta() {
        let prev = prior((400, 40), (100, 10));
        let next = step(Some(&prev), 150, 25);

        assert_eq!(next.observation, Observation::Steady);
        assert_eq!(next.record.lifetime_tx, 450);
        assert_eq!(next.record.lifetime_rx, 55);
        assert_eq!(next.record.last_observed(), TrafficCounters::new(150, 25));
    }

    #[test]
    fn unchanged_counters_are_a_zero_delta_not_a_restart() {
        let prev = prior((400, 40), (100, 10));
        let next = step(Some(&prev), 100, 10);

        assert_eq!(next.observation, Observation::Steady);
        assert_eq!(next.record.lifetime(), prev.lifetime());
    }

    #[test]
    fn restart_adds_the_whole_sample() {
        let prev = prior((400, 40), (100, 10));
        let next = step(Some(&prev), 30, 12);

        assert_eq!(next.observation, Observation::Restart);
        assert_eq!(next.record.lifetime_tx, 430);
        assert_eq!(next.record.lifetime_rx, 52);
        assert_eq!(next.record.last_observed(), TrafficCounters::new(30, 12));
    }

    #[test]
    fn one_counter_going_back_restarts_both() {
        let prev = prior((400, 40), (100, 10));
        let next = step(Some(&prev), 150, 5);

        assert_eq!(next.observation, Observation::Restart);
        assert_eq!(next.record.lifetime_tx, 550);
        assert_eq!(next.record.lifetime_rx, 45);
    }

    #[test]
    fn lifetime_saturates_instead_of_wrapping() {
        let prev = prior((u64::MAX - 5, 0), (10, 0));
        let next = step(Some(&prev), 100, 0);

        assert_eq!(next.record.lifetime_tx, u64::MAX);
    }

    #[test]
    fn lifetime_never_decreases_over_a_restart_sequence() {
        let samples = [
            (1000, 500),
            (1500, 700),
            (200, 100),
            (200, 100),
            (0, 50),
            (900, 60),
            (10, 10),
        ];
        let mut current: Option<CounterRecord> = None;
        for (tx, rx) in samples {
            let next = step(current.as_ref(), tx, rx);
            if let Some(prev) = &current {
                assert!(next.record.lifetime_tx >= prev.lifetime_tx);
                assert!(next.record.lifetime_rx >= prev.lifetime_rx);
            }
            current = Some(next.record);
        }

        let last = current.unwrap();
        // 1000 + 500 + 200 + 0 + 0 + 900 + 10
        assert_eq!(last.lifetime_tx, 2610);
        // 500 + 200 + 100 + 0 + 50 + 10 + 10
        assert_eq!(last.lifetime_rx, 870);
    }
}
