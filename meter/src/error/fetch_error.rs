use std::time::Duration;
use thiserror::Error;

/// Failure of a single node scrape. The collector skips the node for the
/// current tick and retries on the next one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("node unreachable: {0}")]
    Unreachable(String),

    #[error("node did not answer within {0:?}")]
    Timeout(Duration),

    #[error("node rejected credentials with status {0}")]
    Unauthorized(u16),

    #[error("bad response from node: {0}")]
    BadResponse(String),
}
