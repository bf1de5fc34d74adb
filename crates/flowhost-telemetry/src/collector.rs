//! テレメトリコレクタ
//!
//! 呼び出しごとに統計スナップショットを 1 つ読み、`ResourceSample` にして
//! 保存する。インスタンスごとにネットワークの基準値と最終タイムスタンプを持ち、
//! ポーリングをまたいで差分と順序を保つ。

use crate::compute::{StatsSnapshot, counter_delta};
use crate::error::{Result, TelemetryError};
use crate::store::SampleStore;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use flowhost_core::{Instance, InstanceStore, ResourceSample};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// コンテナ ID をキーにした統計スナップショットの取得元
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn snapshot(&self, container_id: &str) -> Result<StatsSnapshot>;
}

#[derive(Debug, Clone, Copy)]
struct Baseline {
    rx: u64,
    tx: u64,
    timestamp: DateTime<Utc>,
}

pub struct TelemetryCollector {
    instances: Arc<dyn InstanceStore>,
    source: Arc<dyn StatsSource>,
    samples: Arc<dyn SampleStore>,
    baselines: Mutex<HashMap<Uuid, Baseline>>,
    clock: fn() -> DateTime<Utc>,
}

impl TelemetryCollector {
    pub fn new(
        instances: Arc<dyn InstanceStore>,
        source: Arc<dyn StatsSource>,
        samples: Arc<dyn SampleStore>,
    ) -> Self {
        Self {
            instances,
            source,
            samples,
            baselines: Mutex::new(HashMap::new()),
            clock: Utc::now,
        }
    }

    /// 時計を差し替える
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn samples(&self) -> &Arc<dyn SampleStore> {
        &self.samples
    }

    pub async fn collect_by_id(&self, instance_id: Uuid) -> Result<ResourceSample> {
        let instance = self
            .instances
            .get(instance_id)
            .await?
            .filter(|i| !i.status.is_deleted())
            .ok_or(TelemetryError::InstanceNotFound(instance_id))?;
        self.collect(&instance).await
    }

    /// インスタンスを 1 つサンプリングする。インスタンスレコードは変更しない
    pub async fn collect(&self, instance: &Instance) -> Result<ResourceSample> {
        if instance.status.is_deleted() {
            return Err(TelemetryError::InstanceNotFound(instance.id));
        }
        let container_id = instance
            .container_id
            .as_deref()
            .ok_or(TelemetryError::NoRuntimeHandle(instance.id))?;

        let snapshot = self.source.snapshot(container_id).await?;
        let (rx, tx) = snapshot.network_totals();

        let sample = {
            let mut baselines = self.baselines.lock().await;
            let previous = baselines.get(&instance.id).copied();

            let mut timestamp = (self.clock)();
            if let Some(prev) = previous {
                if timestamp <= prev.timestamp {
                    timestamp = prev.timestamp + TimeDelta::milliseconds(1);
                }
            }

            baselines.insert(instance.id, Baseline { rx, tx, timestamp });

            ResourceSample {
                instance_id: instance.id,
                timestamp,
                cpu_percent: snapshot.cpu_percent(),
                memory_usage: snapshot.memory_usage,
                memory_limit: snapshot.memory_limit,
                memory_percent: ResourceSample::memory_percent_of(
                    snapshot.memory_usage,
                    snapshot.memory_limit,
                ),
                network_in: counter_delta(previous.map(|p| p.rx), rx),
                network_out: counter_delta(previous.map(|p| p.tx), tx),
            }
        };

        if let Err(e) = self.samples.insert(sample.clone()).await {
            warn!(instance_id = %instance.id, error = %e, "failed to persist resource sample");
        }

        debug!(
            instance_id = %instance.id,
            cpu = sample.cpu_percent,
            memory = sample.memory_usage,
            network_in = sample.network_in,
            network_out = sample.network_out,
            "collected resource sample"
        );
        Ok(sample)
    }

    /// 削除したインスタンスの基準値を捨てる
    pub async fn forget(&self, instance_id: Uuid) {
        self.baselines.lock().await.remove(&instance_id);
    }

    pub async fn tracked(&self) -> usize {
        self.baselines.lock().await.len()
    }
}
