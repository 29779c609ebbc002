use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// The host refused the operation by policy (e.g. a browser blocking
    /// playback that was not started by a user gesture).
    #[error("Operation not allowed by host: {0}")]
    NotAllowed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns `true` when the host rejected the call by policy rather than failing.
    pub fn is_not_allowed(&self) -> bool {
        matches!(self, BridgeError::NotAllowed(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
