//! 統計とストアのテストダブル

use crate::compute::StatsSnapshot;
use crate::collector::StatsSource;
use crate::error::{Result, TelemetryError};
use crate::store::{HourlyRollup, SampleStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowhost_core::ResourceSample;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// コンテナごとにキューのスナップショットを返し、尽きたらフォールバック (あれば)
#[derive(Default)]
pub struct ScriptedStats {
    queued: Mutex<HashMap<String, VecDeque<StatsSnapshot>>>,
    fallback: Option<StatsSnapshot>,
    delays: Mutex<HashMap<String, Duration>>,
    failing: Mutex<HashSet<String>>,
}

impl ScriptedStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// すべてのコンテナが `snapshot` を返す
    pub fn repeating(snapshot: StatsSnapshot) -> Self {
        Self {
            fallback: Some(snapshot),
            ..Self::default()
        }
    }

    pub async fn push(&self, container_id: &str, snapshot: StatsSnapshot) {
        self.queued
            .lock()
            .await
            .entry(container_id.to_string())
            .or_default()
            .push_back(snapshot);
    }

    /// `container_id` の応答前にスリープする
    pub async fn delay(&self, container_id: &str, delay: Duration) {
        self.delays
            .lock()
            .await
            .insert(container_id.to_string(), delay);
    }

    pub async fn fail(&self, container_id: &str) {
        self.failing.lock().await.insert(container_id.to_string());
    }
}

#[async_trait]
impl StatsSource for ScriptedStats {
    async fn snapshot(&self, container_id: &str) -> Result<StatsSnapshot> {
        let delay = self.delays.lock().await.get(container_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().await.contains(container_id) {
            return Err(TelemetryError::RuntimeUnavailable(format!(
                "stats failed for {}",
                container_id
            )));
        }
        let queued = self
            .queued
            .lock()
            .await
            .get_mut(container_id)
            .and_then(VecDeque::pop_front);
        queued.or_else(|| self.fallback.clone()).ok_or_else(|| {
            TelemetryError::RuntimeUnavailable(format!("no stats for {}", container_id))
        })
    }
}

/// すべての呼び出しが失敗するサンプルストア
pub struct FailingSampleStore;

#[async_trait]
impl SampleStore for FailingSampleStore {
    async fn insert(&self, _sample: ResourceSample) -> Result<()> {
        Err(TelemetryError::Persistence("store offline".to_string()))
    }

    async fn latest(&self, _instance_id: Uuid) -> Result<Option<ResourceSample>> {
        Err(TelemetryError::Persistence("store offline".to_string()))
    }

    async fn raw_window(
        &self,
        _instance_id: Uuid,
        _since: DateTime<Utc>,
    ) -> Result<Vec<ResourceSample>> {
        Err(TelemetryError::Persistence("store offline".to_string()))
    }

    async fn rollup_window(
        &self,
        _instance_id: Uuid,
        _since: DateTime<Utc>,
    ) -> Result<Vec<HourlyRollup>> {
        Err(TelemetryError::Persistence("store offline".to_string()))
    }

    async fn refresh_rollup(&self) -> Result<usize> {
        Err(TelemetryError::Persistence("store offline".to_string()))
    }

    async fn prune(&self, _before: DateTime<Utc>) -> Result<usize> {
        Err(TelemetryError::Persistence("store offline".to_string()))
    }
}
