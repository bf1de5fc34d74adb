//! リライト API クライアント (AdGuard Home 互換)
//!
//! `GET /control/rewrite/list`、`POST /control/rewrite/add`、
//! `POST /control/rewrite/delete` を HTTP Basic 認証で呼ぶ。削除エンドポイントは
//! リライトを消さずに 200 を返すことがある。

use crate::error::{DnsError, Result};
use crate::service::{DeleteRequest, NameMapping, NameService};
use async_trait::async_trait;
use std::time::Duration;

/// リライト API の接続設定
#[derive(Debug, Clone)]
pub struct RewriteApiConfig {
    /// `<protocol>://<host>`
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl RewriteApiConfig {
    /// `ADGUARD_HOST`、`ADGUARD_USERNAME`、`ADGUARD_PASSWORD`、
    /// `ADGUARD_PROTOCOL` (デフォルト `https`) から構築する
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("ADGUARD_HOST")
            .map_err(|_| DnsError::MissingEnvVar("ADGUARD_HOST".to_string()))?;
        let username = std::env::var("ADGUARD_USERNAME")
            .map_err(|_| DnsError::MissingEnvVar("ADGUARD_USERNAME".to_string()))?;
        let password = std::env::var("ADGUARD_PASSWORD")
            .map_err(|_| DnsError::MissingEnvVar("ADGUARD_PASSWORD".to_string()))?;
        let protocol = std::env::var("ADGUARD_PROTOCOL").unwrap_or_else(|_| "https".to_string());

        Ok(Self {
            base_url: format!("{}://{}", protocol, host),
            username,
            password,
            timeout: Duration::from_secs(10),
        })
    }
}

pub struct RewriteApi {
    client: reqwest::Client,
    config: RewriteApiConfig,
}

impl RewriteApi {
    pub fn new(config: RewriteApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(DnsError::ApiError {
            status: status.as_u16(),
            body,
        })
    }

    async fn post<T: serde::Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<()> {
        let response = self
            .client
            .post(self.url(path))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl NameService for RewriteApi {
    fn name(&self) -> &str {
        "api"
    }

    async fn list(&self) -> Result<Vec<NameMapping>> {
        let response = self
            .client
            .get(self.url("/control/rewrite/list"))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await?;

        let response = Self::check(response).await?;
        // 空のリストは `null` で返ってくる
        let mappings: Option<Vec<NameMapping>> = response.json().await?;
        Ok(mappings.unwrap_or_default())
    }

    async fn add(&self, mapping: &NameMapping) -> Result<()> {
        tracing::info!(label = %mapping.label, answer = %mapping.answer, "Adding rewrite via API");
        self.post("/control/rewrite/add", mapping).await
    }

    async fn delete(&self, request: &DeleteRequest) -> Result<()> {
        tracing::info!(label = %request.label, answer = ?request.answer, "Deleting rewrite via API");
        self.post("/control/rewrite/delete", request).await
    }
}
