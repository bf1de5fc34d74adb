use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// n8n が待ち受けるコンテナポート
pub const N8N_PORT: u16 = 5678;

/// インスタンスのコンテナ作成に必要な情報
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    pub labels: BTreeMap<String, String>,
    pub nano_cpus: i64,
    pub memory_bytes: i64,
    /// (ボリューム名, マウントパス)
    pub volumes: Vec<(String, String)>,
    pub network: String,
    pub exposed_port: u16,
}

impl ContainerSpec {
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
}

/// プロビジョナが使うランタイム操作
#[async_trait]
pub trait ProvisioningRuntime: Send + Sync {
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// コンテナ ID を返す
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, container_id: &str) -> Result<()>;

    async fn stop(&self, container_id: &str, timeout: Duration) -> Result<StopOutcome>;

    /// 強制削除。既に存在しないコンテナは `ContainerNotFound`
    async fn remove(&self, container_id: &str) -> Result<()>;

    /// `network` 上のコンテナの IP アドレス
    async fn container_ip(&self, container_id: &str, network: &str) -> Result<String>;

    async fn remove_volume(&self, name: &str) -> Result<()>;
}
