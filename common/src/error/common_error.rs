use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Invalid traffic snapshot: {0}")]
    InvalidSnapshot(String),
}
