//! インスタンスレコードとライフサイクル状態

use crate::model::Quota;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// インスタンスのライフサイクル状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// レコードのみ存在し、コンテナはまだない
    Pending,
    Running,
    Stopped,
    /// 回復不能な実行時障害。手動の start/stop/delete でのみ抜ける
    Error,
    Deleted,
}

impl InstanceStatus {
    pub fn can_start(&self) -> bool {
        matches!(self, InstanceStatus::Stopped | InstanceStatus::Error)
    }

    pub fn can_stop(&self) -> bool {
        matches!(self, InstanceStatus::Running | InstanceStatus::Error)
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, InstanceStatus::Deleted)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Pending => write!(f, "pending"),
            InstanceStatus::Running => write!(f, "running"),
            InstanceStatus::Stopped => write!(f, "stopped"),
            InstanceStatus::Error => write!(f, "error"),
            InstanceStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// `Provisioner::create` の入力
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl CreateRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// テナントがプロビジョニングしたワークフロー自動化環境
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: String,
    pub status: InstanceStatus,

    /// コンテナランタイムのハンドル。`Pending` の間だけ `None`
    pub container_id: Option<String>,

    /// 決定的なコンテナ識別子 (`n8n-<owner8>-<name>`)
    pub container_name: String,
    pub subdomain: String,
    /// `<subdomain>.<public-domain>`
    pub url: String,

    pub cpu_cores: f64,
    pub memory_mb: u64,
    pub storage_gb: u64,

    pub basic_auth_user: String,
    pub basic_auth_password: String,

    /// インスタンスネットワーク上で最後に観測したアドレス
    pub container_ip: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    /// オーナーのクォータからリソースを写した `Pending` インスタンス
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        owner_id: Uuid,
        request: &CreateRequest,
        container_name: impl Into<String>,
        subdomain: impl Into<String>,
        domain: &str,
        quota: &Quota,
        basic_auth_password: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let subdomain = subdomain.into();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name: request.name.clone(),
            description: request.description.clone(),
            status: InstanceStatus::Pending,
            container_id: None,
            container_name: container_name.into(),
            url: format!("{}.{}", subdomain, domain),
            basic_auth_user: subdomain.clone(),
            subdomain,
            cpu_cores: quota.cpu_cores,
            memory_mb: quota.memory_mb,
            storage_gb: quota.storage_gb,
            basic_auth_password: basic_auth_password.into(),
            container_ip: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 作成直後 (未起動) のコンテナのハンドルを記録する
    pub fn attach_container(&mut self, container_id: impl Into<String>) {
        self.container_id = Some(container_id.into());
        self.set_status(InstanceStatus::Stopped);
    }

    pub fn set_status(&mut self, status: InstanceStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn is_provisioned(&self) -> bool {
        self.container_id.is_some()
    }

    /// `Pending` 以外のときに限りハンドルがある
    pub fn lifecycle_consistent(&self) -> bool {
        self.container_id.is_none() == (self.status == InstanceStatus::Pending)
    }

    /// ネームサービスに登録するラベル
    pub fn dns_label(&self, internal_suffix: &str) -> String {
        format!("{}.{}", self.subdomain, internal_suffix)
    }
}
