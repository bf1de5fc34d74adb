//! ストアのエラーと全コンポーネント共通のエラー分類

use thiserror::Error;

/// HTTP 層へ公開するエラー種別
///
/// 各クレートは独自のエラー enum を持ち、`kind()` で
/// このフラットな分類に写像する
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    QuotaExceeded,
    Conflict,
    RuntimeFailure,
    NameServiceFailure,
    PersistenceFailure,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::InvalidState => write!(f, "invalid_state"),
            ErrorKind::QuotaExceeded => write!(f, "quota_exceeded"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::RuntimeFailure => write!(f, "runtime_failure"),
            ErrorKind::NameServiceFailure => write!(f, "name_service_failure"),
            ErrorKind::PersistenceFailure => write!(f, "persistence_failure"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Instance not found: {0}")]
    NotFound(uuid::Uuid),

    #[error("Instance already exists: {0}")]
    AlreadyExists(uuid::Uuid),

    #[error("State error: {0}")]
    StateError(String),

    #[error("State is locked: {0}")]
    LockError(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::AlreadyExists(_) => ErrorKind::Conflict,
            _ => ErrorKind::PersistenceFailure,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
