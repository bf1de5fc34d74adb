use flowhost_core::{ErrorKind, InstanceStatus, StoreError};
use flowhost_telemetry::TelemetryError;
use thiserror::Error;
use uuid::Uuid;

/// コンテナランタイム (Docker) のエラー
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(
        "Dockerに接続できません: {0}\n\nヒント:\n  • Dockerが起動しているか確認してください\n  • DOCKER_HOST の設定を確認してください"
    )]
    ConnectionFailed(String),

    #[error("コンテナ '{0}' が見つかりません")]
    ContainerNotFound(String),

    #[error("イメージ '{image}' を取得できません: {reason}")]
    ImagePullFailed { image: String, reason: String },

    #[error("コンテナ '{container}' にネットワーク '{network}' のIPアドレスがありません")]
    NoNetworkAddress { container: String, network: String },

    #[error("Docker API呼び出しがタイムアウトしました: {0}")]
    Timeout(String),

    #[error("Docker APIエラー: {0}")]
    Api(String),
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(err: bollard::errors::Error) -> Self {
        match &err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => {
                // 呼び出し側で「既に存在しない」として扱う
                RuntimeError::ContainerNotFound(message.clone())
            }
            _ => {
                let err_str = err.to_string();
                if err_str.contains("Connection refused")
                    || err_str.contains("No such file or directory")
                {
                    RuntimeError::ConnectionFailed(err_str)
                } else {
                    RuntimeError::Api(err_str)
                }
            }
        }
    }
}

/// ライフサイクル操作のエラー
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Instance not found: {0}")]
    NotFound(Uuid),

    #[error("Cannot {action} instance {id} in state {status}")]
    InvalidState {
        id: Uuid,
        status: InstanceStatus,
        action: &'static str,
    },

    #[error("Instance quota exceeded: owner {owner_id} already has {limit} instances")]
    QuotaExceeded { owner_id: Uuid, limit: usize },

    #[error("An instance named '{0}' already exists")]
    Conflict(String),

    #[error("Instance {0} has no container yet")]
    NoRuntimeHandle(Uuid),

    #[error("No free subdomain for '{0}'")]
    SubdomainExhausted(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

impl ProvisionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProvisionError::NotFound(_) => ErrorKind::NotFound,
            ProvisionError::InvalidState { .. } | ProvisionError::NoRuntimeHandle(_) => {
                ErrorKind::InvalidState
            }
            ProvisionError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            ProvisionError::Conflict(_) | ProvisionError::SubdomainExhausted(_) => {
                ErrorKind::Conflict
            }
            ProvisionError::Runtime(_) => ErrorKind::RuntimeFailure,
            ProvisionError::Store(e) => e.kind(),
            ProvisionError::Telemetry(e) => e.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
