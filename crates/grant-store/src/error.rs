use chrono::TimeDelta;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("TTL must be positive and representable, got {0}")]
    InvalidTtl(TimeDelta),

    #[error("Grant already issued for key: {0}")]
    KeyExists(String),

    #[error("Unknown grant kind: {0}")]
    InvalidKind(String),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),
}
