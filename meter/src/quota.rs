use crate::error::Result;
use crate::store::{CounterStore, UserDirectory};
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaOutcome {
    UnknownUser,
    /// No limit, or auto-disable is off for this account.
    Unlimited,
    WithinLimit { used: u64, limit: u64 },
    /// The account was enabled and this call disabled it.
    Disabled { used: u64, limit: u64 },
    AlreadyDisabled { used: u64, limit: u64 },
}

impl QuotaOutcome {
    pub fn is_exceeded(&self) -> bool {
        matches!(
            self,
            QuotaOutcome::Disabled { .. } | QuotaOutcome::AlreadyDisabled { .. }
        )
    }

    /// `(used, limit)` in bytes, when a limit applied.
    pub fn usage(&self) -> Option<(u64, u64)> {
        match *self {
            QuotaOutcome::WithinLimit { used, limit }
            | QuotaOutcome::Disabled { used, limit }
            | QuotaOutcome::AlreadyDisabled { used, limit } => Some((used, limit)),
            QuotaOutcome::UnknownUser | QuotaOutcome::Unlimited => None,
        }
    }
}

/// Suspends accounts whose lifetime traffic across all nodes reached their
/// limit. Shared by the collector and the authentication path.
#[derive(Clone)]
pub struct QuotaEnforcer {
    users: Arc<dyn UserDirectory>,
    counters: Arc<dyn CounterStore>,
}

impl QuotaEnforcer {
    pub fn new(users: Arc<dyn UserDirectory>, counters: Arc<dyn CounterStore>) -> Self {
        Self { users, counters }
    }

    #[instrument(skip(self))]
    pub async fn enforce(&self, username: &str) -> Result<QuotaOutcome> {
        let Some(user) = self.users.find_user(username).await? else {
            return Ok(QuotaOutcome::UnknownUser);
        };
        if !user.has_enforced_limit() {
            return Ok(QuotaOutcome::Unlimited);
        }

        let used = self.counters.usage_for_user(username).await?.total();
        let limit = user.traffic_limit;
        if used < limit {
            return Ok(QuotaOutcome::WithinLimit { used, limit });
        }
        if !user.enabled {
            return Ok(QuotaOutcome::AlreadyDisabled { used, limit });
        }

        if self.users.disable_user(username).await? {
            info!(
                "User {} disabled due to traffic limit exceeded: {}/{} bytes",
                username, used, limit
            );
            Ok(QuotaOutcome::Disabled { used, limit })
        } else {
            Ok(QuotaOutcome::AlreadyDisabled { used, limit })
        }
    }

    /// Clear the user's counters on every node and re-enable the account.
    #[instrument(skip(self))]
    pub async fn reset_traffic(&self, username: &str) -> Result<u64> {
        self.counters.reset_user_traffic(username).await
    }
}
