use std::fmt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A structural rule a transaction failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid format: {0}")]
    Format(String),
    #[error("insufficient funds: required {required} shannons, collected {collected} shannons")]
    InsufficientFunds { required: u128, collected: u128 },
    #[error("insufficient capacity: outputs and fee exceed inputs by {shortfall} shannons")]
    InsufficientCapacity { shortfall: u128 },
    #[error("capacity overflow: {0}")]
    CapacityOverflow(String),
    #[error("transaction skeleton is already sealed")]
    AlreadySealed,
    #[error("validation failed, {0}")]
    Validation(#[from] ValidationError),
    #[error("expected {expected} signatures, got {actual}")]
    SignatureCount { expected: usize, actual: usize },
    #[error("missing witness for input {0}")]
    MissingWitness(usize),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("invalid address: {0}")]
    Address(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("cancelled")]
    Cancelled,
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation(ValidationError::new(field, reason))
    }
}
