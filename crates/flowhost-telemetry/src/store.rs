//! 時間単位ロールアップ付きの時系列サンプルストア

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use flowhost_core::ResourceSample;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

/// インスタンスごとの 1 時間分の集計
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyRollup {
    pub instance_id: Uuid,
    pub hour: DateTime<Utc>,
    pub cpu_avg: f64,
    pub cpu_max: f64,
    pub memory_avg: f64,
    pub memory_max: u64,
    pub memory_limit: u64,
    pub memory_percent_avg: f64,
    pub network_in: u64,
    pub network_out: u64,
    pub samples: u64,
}

#[async_trait]
pub trait SampleStore: Send + Sync {
    async fn insert(&self, sample: ResourceSample) -> Result<()>;

    async fn latest(&self, instance_id: Uuid) -> Result<Option<ResourceSample>>;

    /// `timestamp > since` の生サンプル (古い順)
    async fn raw_window(
        &self,
        instance_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<ResourceSample>>;

    /// `since` より後に終わる時間のロールアップ行 (古い順)
    async fn rollup_window(
        &self,
        instance_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<HourlyRollup>>;

    /// 生サンプルからロールアップを再計算する。書き込んだ行数を返す
    async fn refresh_rollup(&self) -> Result<usize>;

    /// `before` より古い生サンプルとロールアップ行を捨てる。削除した生サンプル数を返す
    async fn prune(&self, before: DateTime<Utc>) -> Result<usize>;
}

/// `ts` を含む時間の開始時刻
pub fn hour_of(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::hours(1)).unwrap_or(ts)
}

fn rollup_of(instance_id: Uuid, hour: DateTime<Utc>, samples: &[&ResourceSample]) -> HourlyRollup {
    let n = samples.len() as f64;
    HourlyRollup {
        instance_id,
        hour,
        cpu_avg: samples.iter().map(|s| s.cpu_percent).sum::<f64>() / n,
        cpu_max: samples.iter().map(|s| s.cpu_percent).fold(0.0, f64::max),
        memory_avg: samples.iter().map(|s| s.memory_usage as f64).sum::<f64>() / n,
        memory_max: samples.iter().map(|s| s.memory_usage).max().unwrap_or(0),
        memory_limit: samples.iter().map(|s| s.memory_limit).max().unwrap_or(0),
        memory_percent_avg: samples.iter().map(|s| s.memory_percent).sum::<f64>() / n,
        network_in: samples.iter().map(|s| s.network_in).sum(),
        network_out: samples.iter().map(|s| s.network_out).sum(),
        samples: samples.len() as u64,
    }
}

/// インメモリのストア。ロールアップに反映されるのは
/// 最後の `refresh_rollup` 時点の生データのみ
#[derive(Default)]
pub struct MemorySampleStore {
    samples: RwLock<HashMap<Uuid, Vec<ResourceSample>>>,
    rollups: RwLock<HashMap<Uuid, BTreeMap<DateTime<Utc>, HourlyRollup>>>,
}

impl MemorySampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.samples.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SampleStore for MemorySampleStore {
    async fn insert(&self, sample: ResourceSample) -> Result<()> {
        let mut samples = self.samples.write().await;
        let series = samples.entry(sample.instance_id).or_default();
        // タイムスタンプはインスタンスごとに順に届く
        let pos = series.partition_point(|s| s.timestamp <= sample.timestamp);
        series.insert(pos, sample);
        Ok(())
    }

    async fn latest(&self, instance_id: Uuid) -> Result<Option<ResourceSample>> {
        Ok(self
            .samples
            .read()
            .await
            .get(&instance_id)
            .and_then(|series| series.last().cloned()))
    }

    async fn raw_window(
        &self,
        instance_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<ResourceSample>> {
        Ok(self
            .samples
            .read()
            .await
            .get(&instance_id)
            .map(|series| {
                series
                    .iter()
                    .filter(|s| s.timestamp > since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn rollup_window(
        &self,
        instance_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<HourlyRollup>> {
        let first_hour = hour_of(since);
        Ok(self
            .rollups
            .read()
            .await
            .get(&instance_id)
            .map(|rows| rows.range(first_hour..).map(|(_, r)| r.clone()).collect())
            .unwrap_or_default())
    }

    async fn refresh_rollup(&self) -> Result<usize> {
        let samples = self.samples.read().await;
        let mut refreshed: HashMap<Uuid, BTreeMap<DateTime<Utc>, HourlyRollup>> = HashMap::new();
        let mut written = 0;

        for (instance_id, series) in samples.iter() {
            let mut by_hour: BTreeMap<DateTime<Utc>, Vec<&ResourceSample>> = BTreeMap::new();
            for sample in series {
                by_hour.entry(hour_of(sample.timestamp)).or_default().push(sample);
            }
            let rows = refreshed.entry(*instance_id).or_default();
            for (hour, bucket) in by_hour {
                rows.insert(hour, rollup_of(*instance_id, hour, &bucket));
                written += 1;
            }
        }
        drop(samples);

        // 生データが削除済みの時間はロールアップ行を残す
        let mut rollups = self.rollups.write().await;
        for (instance_id, rows) in refreshed {
            rollups.entry(instance_id).or_default().extend(rows);
        }
        tracing::debug!(rows = written, "hourly rollup refreshed");
        Ok(written)
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        let mut samples = self.samples.write().await;
        for series in samples.values_mut() {
            let len = series.len();
            series.retain(|s| s.timestamp >= before);
            removed += len - series.len();
        }
        samples.retain(|_, series| !series.is_empty());
        drop(samples);

        let mut rollups = self.rollups.write().await;
        for rows in rollups.values_mut() {
            rows.retain(|hour, _| *hour >= hour_of(before));
        }
        rollups.retain(|_, rows| !rows.is_empty());

        Ok(removed)
    }
}
