//! Router error types

use osclink_core::ValidationError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("no handler registered for pattern: {0}")]
    NoHandler(String),

    #[error("delivery failed for {} binding(s)", .0.len())]
    Delivery(Vec<DeliveryFailure>),

    #[error("bundle nesting exceeds {max} levels")]
    BundleTooDeep { max: usize },

    #[error("send error: {0}")]
    Send(String),

    #[error("scheduler error: {0}")]
    Scheduler(String),
}

/// Why a single binding did not receive a message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// One binding that failed during a dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// Address of the message being delivered
    pub address: String,
    /// Source text of the binding's pattern
    pub pattern: String,
    pub error: HandlerError,
}

impl std::fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (via {}): {}", self.address, self.pattern, self.error)
    }
}
