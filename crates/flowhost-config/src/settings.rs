//! 設定ファイルの構造
//!
//! すべてのフィールドにデフォルト値があり、ファイルが無くても動作する。

use crate::duration::serde_str;
use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub docker: DockerSettings,
    pub dns: DnsSettings,
    pub monitoring: MonitoringSettings,
    pub telemetry: TelemetrySettings,
    pub provisioning: ProvisioningSettings,
    pub state: StateSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// 公開ドメイン (`<subdomain>.<domain>`)
    pub domain: String,
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            domain: "launchstack.io".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSettings {
    /// 未指定ならローカルのデフォルトソケット
    pub host: Option<String>,
    pub network: String,
    pub base_image: String,
    #[serde(with = "serde_str")]
    pub stop_timeout: Duration,
    /// ランタイム API 呼び出しごとのタイムアウト
    #[serde(with = "serde_str")]
    pub call_timeout: Duration,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            host: None,
            network: "n8n".to_string(),
            base_image: "n8nio/n8n:latest".to_string(),
            stop_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsSettings {
    /// 内部ラベルのサフィックス (`<subdomain>.<internal_suffix>`)
    pub internal_suffix: String,
    pub api: DnsApiSettings,
    /// ローカル DNS ツール。存在しなければ API のみ使用
    pub cli_path: Option<PathBuf>,
    #[serde(with = "serde_str")]
    pub verify_delay: Duration,
    #[serde(with = "serde_str")]
    pub retry_delay: Duration,
    #[serde(with = "serde_str")]
    pub sweep_interval: Duration,
    /// スイープ対象外のラベル
    pub excluded_labels: Vec<String>,
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            internal_suffix: "internal".to_string(),
            api: DnsApiSettings::default(),
            cli_path: Some(PathBuf::from("./dns-cli")),
            verify_delay: Duration::from_secs(1),
            retry_delay: Duration::from_secs(2),
            sweep_interval: Duration::from_secs(6 * 3600),
            excluded_labels: vec!["test".to_string(), "test-record".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsApiSettings {
    pub protocol: String,
    pub host: String,
    pub username: String,
    pub password: String,
    #[serde(with = "serde_str")]
    pub timeout: Duration,
}

impl Default for DnsApiSettings {
    fn default() -> Self {
        Self {
            protocol: "https".to_string(),
            host: "localhost".to_string(),
            username: String::new(),
            password: String::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl DnsApiSettings {
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.host.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    #[serde(with = "serde_str")]
    pub interval: Duration,
    /// 1 インスタンスあたりの収集タイムアウト
    #[serde(with = "serde_str")]
    pub collect_timeout: Duration,
    pub max_concurrency: usize,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            collect_timeout: Duration::from_secs(5),
            max_concurrency: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// これより長い期間の履歴は時間単位ロールアップから返す
    #[serde(with = "serde_str")]
    pub rollup_threshold: Duration,
    #[serde(with = "serde_str")]
    pub rollup_refresh: Duration,
    /// 生サンプルの保持期間
    #[serde(with = "serde_str")]
    pub retention: Duration,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            rollup_threshold: Duration::from_secs(2 * 3600),
            rollup_refresh: Duration::from_secs(3600),
            retention: Duration::from_secs(30 * 86400),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningSettings {
    /// コンテナ削除からボリューム削除までの待ち時間
    #[serde(with = "serde_str")]
    pub volume_cleanup_delay: Duration,
    #[serde(with = "serde_str")]
    pub volume_cleanup_timeout: Duration,
    pub cleanup_workers: usize,
    pub max_subdomain_attempts: u32,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            volume_cleanup_delay: Duration::from_secs(5),
            volume_cleanup_timeout: Duration::from_secs(30),
            cleanup_workers: 4,
            max_subdomain_attempts: 8,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSettings {
    /// インスタンス状態ファイルのルート。未指定ならメモリのみ
    pub dir: Option<PathBuf>,
}

impl Settings {
    /// 値の整合性チェック
    pub fn validate(&self) -> Result<()> {
        if self.server.domain.trim().is_empty() {
            return Err(ConfigError::Invalid("server.domain が空です".to_string()));
        }
        if self.dns.internal_suffix.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "dns.internal_suffix が空です".to_string(),
            ));
        }
        let intervals = [
            ("monitoring.interval", self.monitoring.interval),
            ("monitoring.collect_timeout", self.monitoring.collect_timeout),
            ("dns.sweep_interval", self.dns.sweep_interval),
            ("telemetry.rollup_refresh", self.telemetry.rollup_refresh),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{} は 0 にできません", name)));
            }
        }
        if self.monitoring.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "monitoring.max_concurrency は 1 以上が必要です".to_string(),
            ));
        }
        if self.provisioning.max_subdomain_attempts == 0 {
            return Err(ConfigError::Invalid(
                "provisioning.max_subdomain_attempts は 1 以上が必要です".to_string(),
            ));
        }
        Ok(())
    }

    /// 除外ラベルを完全なラベル名に展開 (`test` → `test.internal`)
    pub fn excluded_dns_labels(&self) -> Vec<String> {
        self.dns
            .excluded_labels
            .iter()
            .map(|l| format!("{}.{}", l, self.dns.internal_suffix))
            .collect()
    }
}
