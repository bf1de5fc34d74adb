//! ネームサービスの抽象化
//!
//! ネームサービスは `label -> answer` のリライトを保持する。バックエンドは
//! list/add/delete のみで、ラベル指定の取得はない。

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// `label -> answer` のリライト 1 件
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NameMapping {
    #[serde(rename = "domain")]
    pub label: String,
    pub answer: String,
}

impl NameMapping {
    pub fn new(label: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            answer: answer.into(),
        }
    }
}

/// 削除ペイロード。プロバイダはペア全体で削除対象を決める。
/// ラベルのみの形は再試行用
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteRequest {
    #[serde(rename = "domain")]
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

impl DeleteRequest {
    pub fn pair(mapping: &NameMapping) -> Self {
        Self {
            label: mapping.label.clone(),
            answer: Some(mapping.answer.clone()),
        }
    }

    pub fn label_only(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            answer: None,
        }
    }
}

#[async_trait]
pub trait NameService: Send + Sync {
    /// ログ用のバックエンド名
    fn name(&self) -> &str;

    async fn list(&self) -> Result<Vec<NameMapping>>;

    async fn add(&self, mapping: &NameMapping) -> Result<()>;

    /// 何も消さずに成功を返すことがある
    async fn delete(&self, request: &DeleteRequest) -> Result<()>;
}

/// プライマリがエラーのときにフォールバックを使うバックエンド
pub struct FallbackChain {
    primary: Option<Arc<dyn NameService>>,
    fallback: Arc<dyn NameService>,
}

impl FallbackChain {
    pub fn new(primary: Option<Arc<dyn NameService>>, fallback: Arc<dyn NameService>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl NameService for FallbackChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn list(&self) -> Result<Vec<NameMapping>> {
        if let Some(primary) = &self.primary {
            match primary.list().await {
                Ok(mappings) => return Ok(mappings),
                Err(e) => tracing::warn!(
                    backend = primary.name(),
                    error = %e,
                    "list failed, falling back to {}",
                    self.fallback.name()
                ),
            }
        }
        self.fallback.list().await
    }

    async fn add(&self, mapping: &NameMapping) -> Result<()> {
        if let Some(primary) = &self.primary {
            match primary.add(mapping).await {
                Ok(()) => return Ok(()),
                Err(e) => tracing::warn!(
                    backend = primary.name(),
                    label = %mapping.label,
                    error = %e,
                    "add failed, falling back to {}",
                    self.fallback.name()
                ),
            }
        }
        self.fallback.add(mapping).await
    }

    async fn delete(&self, request: &DeleteRequest) -> Result<()> {
        if let Some(primary) = &self.primary {
            match primary.delete(request).await {
                Ok(()) => return Ok(()),
                Err(e) => tracing::warn!(
                    backend = primary.name(),
                    label = %request.label,
                    error = %e,
                    "delete failed, falling back to {}",
                    self.fallback.name()
                ),
            }
        }
        self.fallback.delete(request).await
    }
}
