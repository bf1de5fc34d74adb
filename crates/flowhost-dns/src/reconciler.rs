//! ネームサービスのリコンサイラ
//!
//! `<subdomain>.<suffix> -> ip` のリライトをインスタンスと一致させる。
//! プロバイダの削除は何も消さずに成功することがあるため、
//! `unbind` は削除を検証し、ラベルのみのペイロードで再試行して、
//! それでも残ったものは孤立スイープに任せる。

use crate::error::{DnsError, Result};
use crate::service::{DeleteRequest, NameMapping, NameService};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// リコンサイラのタイミングとラベル規則
#[derive(Debug, Clone)]
pub struct ReconcilePolicy {
    /// 最初の削除を検証するまでの待ち時間
    pub verify_delay: Duration,
    /// ラベルのみの再試行を検証するまでの待ち時間
    pub retry_delay: Duration,
    pub internal_suffix: String,
    /// スイープが触れないラベル (完全一致)
    pub excluded_labels: Vec<String>,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            verify_delay: Duration::from_secs(1),
            retry_delay: Duration::from_secs(2),
            internal_suffix: "internal".to_string(),
            excluded_labels: vec![
                "test.internal".to_string(),
                "test-record.internal".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BindOutcome {
    Created,
    Unchanged,
    Replaced { previous: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UnbindOutcome {
    /// 何も登録されていなかった
    Absent,
    /// `attempts` 回 (1 か 2) の削除で消えたことを確認した
    Removed { attempts: u8 },
    /// 2 回試しても残っている。スイープに任せる
    Lingering,
}

/// 管理ラベル付きのコンテナ (稼働中か否かを問わない)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedContainer {
    pub id: String,
    pub name: String,
    pub subdomain: Option<String>,
    pub running: bool,
}

/// スイープが必要とするランタイムの情報
#[async_trait]
pub trait ContainerLister: Send + Sync {
    /// 停止中も含む全管理コンテナ
    async fn list_managed(&self) -> Result<Vec<ManagedContainer>>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub dry_run: bool,
    /// プロバイダ上のユニークなラベル数
    pub scanned: usize,
    /// 管理パターンに合致し、コンテナが存在するラベル
    pub kept: usize,
    pub orphans: Vec<NameMapping>,
    pub removed: Vec<String>,
    pub lingering: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub struct NameServiceReconciler {
    service: Arc<dyn NameService>,
    policy: ReconcilePolicy,
}

impl NameServiceReconciler {
    pub fn new(service: Arc<dyn NameService>, policy: ReconcilePolicy) -> Self {
        Self { service, policy }
    }

    pub fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    /// `<subdomain>.<内部サフィックス>`
    pub fn label_for(&self, subdomain: &str) -> String {
        format!("{}.{}", subdomain, self.policy.internal_suffix)
    }

    /// `label` がスイープの対象か
    pub fn is_managed_label(&self, label: &str) -> bool {
        let suffix = format!(".{}", self.policy.internal_suffix);
        label.ends_with(&suffix)
            && label.len() > suffix.len()
            && !self.policy.excluded_labels.iter().any(|l| l == label)
    }

    async fn mappings_for(&self, label: &str) -> Result<Vec<NameMapping>> {
        Ok(self
            .service
            .list()
            .await?
            .into_iter()
            .filter(|m| m.label == label)
            .collect())
    }

    /// 一覧全体を線形に探す
    pub async fn lookup(&self, label: &str) -> Result<Option<NameMapping>> {
        Ok(self.mappings_for(label).await?.into_iter().next())
    }

    /// `label` のリライトを作成または置き換える
    pub async fn bind(&self, label: &str, ip: &str) -> Result<BindOutcome> {
        let existing = self.mappings_for(label).await?;

        if existing.len() == 1 && existing[0].answer == ip {
            debug!(%label, %ip, "rewrite already up to date");
            return Ok(BindOutcome::Unchanged);
        }

        let mut previous = None;
        for stale in existing.iter().filter(|m| m.answer != ip) {
            info!(%label, from = %stale.answer, to = %ip, "replacing rewrite");
            if let Err(e) = self.service.delete(&DeleteRequest::pair(stale)).await {
                warn!(%label, answer = %stale.answer, error = %e, "failed to delete stale rewrite");
            }
            previous.get_or_insert_with(|| stale.answer.clone());
        }

        if !existing.iter().any(|m| m.answer == ip) {
            self.service.add(&NameMapping::new(label, ip)).await?;
        }

        Ok(match previous {
            Some(previous) => BindOutcome::Replaced { previous },
            None => {
                info!(%label, %ip, "created rewrite");
                BindOutcome::Created
            }
        })
    }

    /// `label` のリライトを削除する。
    ///
    /// エラーになるのは最初の検索が失敗したときだけ。削除と検証の
    /// 失敗はログに出し、2 回試しても残ったリライトは
    /// `Lingering` になる。
    pub async fn unbind(&self, label: &str) -> Result<UnbindOutcome> {
        let existing = self.mappings_for(label).await?;
        if existing.is_empty() {
            debug!(%label, "no rewrite to remove");
            return Ok(UnbindOutcome::Absent);
        }

        for mapping in &existing {
            if let Err(e) = self.service.delete(&DeleteRequest::pair(mapping)).await {
                warn!(%label, answer = %mapping.answer, error = %e, "delete failed");
            }
        }

        tokio::time::sleep(self.policy.verify_delay).await;
        if self.verified_gone(label).await {
            info!(%label, "rewrite removed");
            return Ok(UnbindOutcome::Removed { attempts: 1 });
        }

        warn!(%label, "rewrite still present after delete, retrying with label-only payload");
        if let Err(e) = self.service.delete(&DeleteRequest::label_only(label)).await {
            warn!(%label, error = %e, "label-only delete failed");
        }

        tokio::time::sleep(self.policy.retry_delay).await;
        if self.verified_gone(label).await {
            info!(%label, "rewrite removed on retry");
            return Ok(UnbindOutcome::Removed { attempts: 2 });
        }

        warn!(%label, "rewrite still present after retry, leaving it to the orphan sweep");
        Ok(UnbindOutcome::Lingering)
    }

    async fn verified_gone(&self, label: &str) -> bool {
        match self.lookup(label).await {
            Ok(found) => found.is_none(),
            Err(e) => {
                warn!(%label, error = %e, "verification lookup failed");
                false
            }
        }
    }

    /// 内部サフィックス配下で、どの管理コンテナにも属さないリライトを削除する。
    ///
    /// コンテナより先にマッピングを取得するので、並行する作成が
    /// 登録したリライトのコンテナは必ずここで見える。
    pub async fn sweep_orphans(
        &self,
        lister: &dyn ContainerLister,
        dry_run: bool,
    ) -> Result<SweepReport> {
        let mappings = self.service.list().await?;
        let containers = lister.list_managed().await?;

        let live: HashSet<String> = containers
            .iter()
            .filter_map(|c| c.subdomain.as_deref())
            .map(|s| self.label_for(s))
            .collect();

        let mut seen = HashSet::new();
        let unique: Vec<NameMapping> = mappings
            .into_iter()
            .filter(|m| seen.insert(m.label.clone()))
            .collect();

        let mut report = SweepReport {
            dry_run,
            scanned: unique.len(),
            ..Default::default()
        };

        for mapping in unique {
            if !self.is_managed_label(&mapping.label) {
                continue;
            }
            if live.contains(&mapping.label) {
                report.kept += 1;
                continue;
            }
            report.orphans.push(mapping);
        }

        info!(
            scanned = report.scanned,
            kept = report.kept,
            orphans = report.orphans.len(),
            containers = containers.len(),
            dry_run,
            "orphan sweep"
        );

        if dry_run {
            for orphan in &report.orphans {
                info!(label = %orphan.label, answer = %orphan.answer, "would remove orphan rewrite");
            }
            return Ok(report);
        }

        let labels: Vec<String> = report.orphans.iter().map(|m| m.label.clone()).collect();
        for label in labels {
            match self.unbind(&label).await {
                Ok(UnbindOutcome::Removed { .. }) | Ok(UnbindOutcome::Absent) => {
                    report.removed.push(label)
                }
                Ok(UnbindOutcome::Lingering) => report.lingering.push(label),
                Err(e) => {
                    warn!(%label, error = %e, "orphan unbind failed");
                    report.failed.push((label, e.to_string()));
                }
            }
        }

        Ok(report)
    }
}

/// 固定リストを返す `ContainerLister`
pub struct StaticContainers(pub Vec<ManagedContainer>);

#[async_trait]
impl ContainerLister for StaticContainers {
    async fn list_managed(&self) -> Result<Vec<ManagedContainer>> {
        Ok(self.0.clone())
    }
}

/// 常に失敗するリスター。この場合スイープは何も削除せず中断する
pub struct UnavailableContainers;

#[async_trait]
impl ContainerLister for UnavailableContainers {
    async fn list_managed(&self) -> Result<Vec<ManagedContainer>> {
        Err(DnsError::ContainerList("runtime unavailable".to_string()))
    }
}
