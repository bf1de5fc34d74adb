use flowhost_core::{ErrorKind, StoreError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Instance not found: {0}")]
    InstanceNotFound(Uuid),

    #[error("Instance {0} has no container yet")]
    NoRuntimeHandle(Uuid),

    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("No samples recorded for instance {0}")]
    NotFound(Uuid),

    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    #[error("Sample store error: {0}")]
    Persistence(String),

    #[error("Instance store error: {0}")]
    Store(#[from] StoreError),
}

impl TelemetryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TelemetryError::InstanceNotFound(_) | TelemetryError::NotFound(_) => {
                ErrorKind::NotFound
            }
            TelemetryError::NoRuntimeHandle(_) | TelemetryError::InvalidPeriod(_) => {
                ErrorKind::InvalidState
            }
            TelemetryError::RuntimeUnavailable(_) => ErrorKind::RuntimeFailure,
            TelemetryError::Persistence(_) => ErrorKind::PersistenceFailure,
            TelemetryError::Store(e) => e.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
