use crate::error::MeterError;
use crate::quota::QuotaEnforcer;
use crate::store::UserDirectory;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid auth format, expected username:password")]
    InvalidFormat,

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("User disabled: {0}")]
    Disabled(String),

    #[error("Invalid password for user: {0}")]
    InvalidPassword(String),

    #[error("Traffic limit exceeded for user {username}: {used}/{limit} bytes")]
    TrafficExceeded {
        username: String,
        used: u64,
        limit: u64,
    },

    #[error("Store error: {0}")]
    Store(#[from] MeterError),
}

/// Hex-encoded SHA-256 of `password`, the form stored in the user table.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Validates `username:password` credentials presented by proxy nodes.
pub struct Authenticator {
    users: Arc<dyn UserDirectory>,
    quota: QuotaEnforcer,
}

impl Authenticator {
    pub fn new(users: Arc<dyn UserDirectory>, quota: QuotaEnforcer) -> Self {
        Self { users, quota }
    }

    /// Returns the username, which nodes use as the traffic accounting id.
    #[instrument(skip(self, auth))]
    pub async fn authenticate(&self, auth: &str) -> Result<String, AuthError> {
        let (username, password) = auth.split_once(':').ok_or(AuthError::InvalidFormat)?;

        let user = self
            .users
            .find_user(username)
            .await?
            .ok_or_else(|| AuthError::UserNotFound(username.to_string()))?;

        if !user.enabled {
            return Err(AuthError::Disabled(username.to_string()));
        }

        if hash_password(password) != user.password_hash {
            warn!("Invalid password for user {}", username);
            return Err(AuthError::InvalidPassword(username.to_string()));
        }

        let outcome = self.quota.enforce(username).await?;
        if outcome.is_exceeded() {
            let (used, limit) = outcome.usage().unwrap_or_default();
            return Err(AuthError::TrafficExceeded {
                username: username.to_string(),
                used,
                limit,
            });
        }

        debug!("User {} authenticated", username);
        Ok(username.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CounterRecord, CounterStore, MemoryStore, NewUser};
    use chrono::Utc;

    async fn setup(limit: u64) -> (Arc<MemoryStore>, Authenticator) {
        let store = Arc::new(MemoryStore::new());
        store
            .create_user(NewUser {
                username: "alice".to_string(),
                password_hash: hash_password("wonderland"),
                traffic_limit: limit,
                auto_disable_on_limit: true,
            })
            .await
            .unwrap();
        let quota = QuotaEnforcer::new(store.clone(), store.clone());
        let auth = Authenticator::new(store.clone(), quota);
        (store, auth)
    }

    async fn record_usage(store: &MemoryStore, tx: u64, rx: u64) {
        store
            .upsert_counter(&CounterRecord {
                node_id: 1,
                username: "alice".to_string(),
                lifetime_tx: tx,
                lifetime_rx: rx,
                last_observed_tx: tx,
                last_observed_rx: rx,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[test]
    fn hash_is_lowercase_sha256_hex() {
        assert_eq!(
            hash_password("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn valid_credentials_return_username() {
        let (_store, auth) = setup(0).await;
        assert_eq!(auth.authenticate("alice:wonderland").await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn password_may_contain_colons() {
        let store = Arc::new(MemoryStore::new());
        store
            .create_user(NewUser {
                username: "bob".to_string(),
                password_hash: hash_password("a:b:c"),
                traffic_limit: 0,
                auto_disable_on_limit: true,
            })
            .await
            .unwrap();
        let auth = Authenticator::new(store.clone(), QuotaEnforcer::new(store.clone(), store));

        assert_eq!(auth.authenticate("bob:a:b:c").await.unwrap(), "bob");
    }

    #[tokio::test]
    async fn missing_separator_is_invalid_format() {
        let (_store, auth) = setup(0).await;
        assert!(matches!(
            auth.authenticate("alice").await,
            Err(AuthError::InvalidFormat)
        ));
    }

    #[tokio::test]
    async fn unknown_user_is_rejected() {
        let (_store, auth) = setup(0).await;
        assert!(matches!(
            auth.authenticate("mallory:x").await,
            Err(AuthError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let (_store, auth) = setup(0).await;
        assert!(matches!(
            auth.authenticate("alice:looking-glass").await,
            Err(AuthError::InvalidPassword(_))
        ));
    }

    #[tokio::test]
    async fn disabled_user_is_rejected_before_password_check() {
        let (store, auth) = setup(0).await;
        store.disable_user("alice").await.unwrap();

        assert!(matches!(
            auth.authenticate("alice:wrong").await,
            Err(AuthError::Disabled(_))
        ));
    }

    #[tokio::test]
    async fn exhausted_quota_disables_on_login() {
        let (store, auth) = setup(1000).await;
        record_usage(&store, 600, 400).await;

        assert!(matches!(
            auth.authenticate("alice:wonderland").await,
            Err(AuthError::TrafficExceeded {
                used: 1000,
                limit: 1000,
                ..
            })
        ));
        assert!(!store.find_user("alice").await.unwrap().unwrap().enabled);

        // Now the account itself is off.
        assert!(matches!(
            auth.authenticate("alice:wonderland").await,
            Err(AuthError::Disabled(_))
        ));
    }

    #[tokio::test]
    async fn usage_below_limit_is_allowed() {
        let (store, auth) = setup(1000).await;
        record_usage(&store, 600, 399).await;

        assert!(auth.authenticate("alice:wonderland").await.is_ok());
    }
}
