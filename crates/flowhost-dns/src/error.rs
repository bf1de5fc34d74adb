//! ネームサービスのエラー型

use flowhost_core::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DnsError {
    #[error("DNS tool not found at {0}")]
    CliNotFound(PathBuf),

    #[error("DNS tool command failed: {0}")]
    CommandFailed(String),

    #[error("Name service API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Mapping not found: {0}")]
    NotFound(String),

    #[error("Container listing failed: {0}")]
    ContainerList(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DnsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DnsError::NotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::NameServiceFailure,
        }
    }
}

pub type Result<T> = std::result::Result<T, DnsError>;
