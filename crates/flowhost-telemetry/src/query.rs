//! テレメトリのクエリ
//!
//! 短い期間は生サンプルをその場でバケット化する。ロールアップの閾値を
//! 超える期間は時間単位ロールアップから返すので、バケット幅は
//! 1 時間単位に切り上げる。

use crate::error::{Result, TelemetryError};
use crate::store::{HourlyRollup, SampleStore};
use chrono::{DateTime, TimeDelta, Utc};
use flowhost_core::ResourceSample;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// `history` が返す点数の上限
pub const MAX_HISTORY_POINTS: usize = 100;

const HOUR: Duration = Duration::from_secs(3600);

/// 集計したサンプルの時間バケット 1 つ
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub bucket: DateTime<Utc>,
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

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageSummary {
    pub samples: u64,
    pub cpu_avg: f64,
    pub cpu_max: f64,
    pub memory_avg: u64,
    pub memory_max: u64,
    pub network_in: u64,
    pub network_out: u64,
    pub network_total: u64,
}

/// 呼び出し側が指定しないときの期間ごとのバケット幅
pub fn auto_resolution(period: Duration) -> Duration {
    const MINUTE: u64 = 60;
    let secs = match period.as_secs() {
        p if p <= 10 * MINUTE => 10,
        p if p <= 60 * MINUTE => MINUTE,
        p if p <= 6 * 60 * MINUTE => 5 * MINUTE,
        p if p <= 24 * 60 * MINUTE => 15 * MINUTE,
        _ => 60 * MINUTE,
    };
    Duration::from_secs(secs)
}

/// `10m`、`1h`、`6h`、`24h`、`7d` または任意の `<n><s|m|h|d>`
pub fn parse_period(input: &str) -> Result<Duration> {
    let period = flowhost_config::parse_duration(input)
        .map_err(|_| TelemetryError::InvalidPeriod(input.to_string()))?;
    if period < Duration::from_secs(1) {
        return Err(TelemetryError::InvalidPeriod(input.to_string()));
    }
    Ok(period)
}

fn bucket_start(ts: DateTime<Utc>, width_secs: i64) -> DateTime<Utc> {
    let start = ts.timestamp().div_euclid(width_secs) * width_secs;
    DateTime::from_timestamp(start, 0).unwrap_or(ts)
}

#[derive(Default)]
struct Accumulator {
    cpu_sum: f64,
    cpu_max: f64,
    memory_sum: f64,
    memory_max: u64,
    memory_limit: u64,
    memory_percent_sum: f64,
    network_in: u64,
    network_out: u64,
    samples: u64,
}

impl Accumulator {
    fn add_sample(&mut self, s: &ResourceSample) {
        self.cpu_sum += s.cpu_percent;
        self.cpu_max = self.cpu_max.max(s.cpu_percent);
        self.memory_sum += s.memory_usage as f64;
        self.memory_max = self.memory_max.max(s.memory_usage);
        self.memory_limit = self.memory_limit.max(s.memory_limit);
        self.memory_percent_sum += s.memory_percent;
        self.network_in += s.network_in;
        self.network_out += s.network_out;
        self.samples += 1;
    }

    fn add_rollup(&mut self, r: &HourlyRollup) {
        let n = r.samples as f64;
        self.cpu_sum += r.cpu_avg * n;
        self.cpu_max = self.cpu_max.max(r.cpu_max);
        self.memory_sum += r.memory_avg * n;
        self.memory_max = self.memory_max.max(r.memory_max);
        self.memory_limit = self.memory_limit.max(r.memory_limit);
        self.memory_percent_sum += r.memory_percent_avg * n;
        self.network_in += r.network_in;
        self.network_out += r.network_out;
        self.samples += r.samples;
    }

    fn point(&self, bucket: DateTime<Utc>) -> HistoryPoint {
        let n = self.samples.max(1) as f64;
        HistoryPoint {
            bucket,
            cpu_avg: self.cpu_sum / n,
            cpu_max: self.cpu_max,
            memory_avg: self.memory_sum / n,
            memory_max: self.memory_max,
            memory_limit: self.memory_limit,
            memory_percent_avg: self.memory_percent_sum / n,
            network_in: self.network_in,
            network_out: self.network_out,
            samples: self.samples,
        }
    }
}

fn newest_first(buckets: BTreeMap<DateTime<Utc>, Accumulator>) -> Vec<HistoryPoint> {
    buckets
        .iter()
        .rev()
        .take(MAX_HISTORY_POINTS)
        .map(|(bucket, acc)| acc.point(*bucket))
        .collect()
}

pub struct TelemetryQuery {
    samples: Arc<dyn SampleStore>,
    rollup_threshold: Duration,
    clock: fn() -> DateTime<Utc>,
}

impl TelemetryQuery {
    pub fn new(samples: Arc<dyn SampleStore>, rollup_threshold: Duration) -> Self {
        Self {
            samples,
            rollup_threshold,
            clock: Utc::now,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// 期間の開始時刻。表現できる範囲を超える期間は不正
    fn since(&self, period: Duration) -> Result<DateTime<Utc>> {
        let invalid = || TelemetryError::InvalidPeriod(format!("{:?}", period));
        let delta = TimeDelta::from_std(period).map_err(|_| invalid())?;
        (self.clock)().checked_sub_signed(delta).ok_or_else(invalid)
    }

    pub async fn latest(&self, instance_id: Uuid) -> Result<ResourceSample> {
        self.samples
            .latest(instance_id)
            .await?
            .ok_or(TelemetryError::NotFound(instance_id))
    }

    /// バケット化した履歴。新しい順で最大 `MAX_HISTORY_POINTS` 件
    pub async fn history(
        &self,
        instance_id: Uuid,
        period: Duration,
        resolution: Option<Duration>,
    ) -> Result<Vec<HistoryPoint>> {
        let resolution = resolution.unwrap_or_else(|| auto_resolution(period));
        if resolution.as_secs() == 0 {
            return Err(TelemetryError::InvalidPeriod(format!(
                "resolution {:?} is below one second",
                resolution
            )));
        }
        let since = self.since(period)?;

        let mut buckets: BTreeMap<DateTime<Utc>, Accumulator> = BTreeMap::new();

        if period > self.rollup_threshold {
            let hours = resolution.as_secs().div_ceil(HOUR.as_secs()).max(1);
            let width = (hours * HOUR.as_secs()) as i64;
            for row in self.samples.rollup_window(instance_id, since).await? {
                buckets
                    .entry(bucket_start(row.hour, width))
                    .or_default()
                    .add_rollup(&row);
            }
        } else {
            let width = resolution.as_secs() as i64;
            for sample in self.samples.raw_window(instance_id, since).await? {
                buckets
                    .entry(bucket_start(sample.timestamp, width))
                    .or_default()
                    .add_sample(&sample);
            }
        }

        Ok(newest_first(buckets))
    }

    /// 生サンプルの平均・最大値とネットワーク合計
    pub async fn summary(&self, instance_id: Uuid, period: Duration) -> Result<UsageSummary> {
        let since = self.since(period)?;
        let samples = self.samples.raw_window(instance_id, since).await?;
        if samples.is_empty() {
            return Ok(UsageSummary::default());
        }

        let mut acc = Accumulator::default();
        samples.iter().for_each(|s| acc.add_sample(s));

        Ok(UsageSummary {
            samples: acc.samples,
            cpu_avg: acc.cpu_sum / acc.samples as f64,
            cpu_max: acc.cpu_max,
            memory_avg: (acc.memory_sum / acc.samples as f64) as u64,
            memory_max: acc.memory_max,
            network_in: acc.network_in,
            network_out: acc.network_out,
            network_total: acc.network_in + acc.network_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySampleStore;

    // 2023-11-14T22:30:00Z
    const NOW: i64 = 1_699_999_200 + 1800;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(NOW, 0).unwrap()
    }

    fn sample(id: Uuid, secs_ago: i64, cpu: f64) -> ResourceSample {
        ResourceSample {
            instance_id: id,
            timestamp: DateTime::from_timestamp(NOW - secs_ago, 0).unwrap(),
            cpu_percent: cpu,
            memory_usage: 100,
            memory_limit: 400,
            memory_percent: 25.0,
            network_in: 10,
            network_out: 1,
        }
    }

    fn query(store: Arc<MemorySampleStore>) -> TelemetryQuery {
        TelemetryQuery::new(store, Duration::from_secs(7200)).with_clock(now)
    }

    #[test]
    fn test_auto_resolution() {
        let m = |n: u64| Duration::from_secs(n * 60);
        assert_eq!(auto_resolution(m(10)), Duration::from_secs(10));
        assert_eq!(auto_resolution(m(60)), m(1));
        assert_eq!(auto_resolution(m(6 * 60)), m(5));
        assert_eq!(auto_resolution(m(24 * 60)), m(15));
        assert_eq!(auto_resolution(m(7 * 24 * 60)), m(60));
    }

    #[test]
    fn test_parse_period() {
        assert_eq!(parse_period("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_period("24h").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_period("7d").unwrap(), Duration::from_secs(604800));
        assert!(matches!(
            parse_period("soon"),
            Err(TelemetryError::InvalidPeriod(_))
        ));
        assert!(parse_period("0s").is_err());
    }

    #[tokio::test]
    async fn test_latest_not_found() {
        let q = query(Arc::new(MemorySampleStore::new()));
        let err = q.latest(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), flowhost_core::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_raw_history_buckets() {
        let store = Arc::new(MemorySampleStore::new());
        let id = Uuid::new_v4();
        // 直近 5 分間、10 秒ごと
        for i in 0..30 {
            store.insert(sample(id, i * 10, i as f64)).await.unwrap();
        }
        // 範囲外
        store.insert(sample(id, 3 * 3600, 99.0)).await.unwrap();

        let points = query(store)
            .history(id, Duration::from_secs(3600), None)
            .await
            .unwrap();

        // 1 分バケット、22:30 .. 22:25
        assert_eq!(points.len(), 6);
        assert_eq!(points[0].bucket, now());
        assert_eq!(points[0].samples, 1);
        assert_eq!(points[1].samples, 6);
        assert!(points.windows(2).all(|w| w[0].bucket > w[1].bucket));
        assert_eq!(points.iter().map(|p| p.samples).sum::<u64>(), 30);
        assert_eq!(points[1].network_in, 60);
        assert_eq!(points[1].memory_percent_avg, 25.0);
        assert!(points.iter().all(|p| p.cpu_max < 99.0));
    }

    #[tokio::test]
    async fn test_history_cap_newest_first() {
        let store = Arc::new(MemorySampleStore::new());
        let id = Uuid::new_v4();
        for i in 0..200 {
            store.insert(sample(id, i, 1.0)).await.unwrap();
        }

        let points = query(store)
            .history(id, Duration::from_secs(600), Some(Duration::from_secs(1)))
            .await
            .unwrap();

        assert_eq!(points.len(), MAX_HISTORY_POINTS);
        assert_eq!(points[0].bucket, now());
        assert_eq!(
            points[99].bucket,
            DateTime::from_timestamp(NOW - 99, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_long_period_uses_rollup() {
        let store = Arc::new(MemorySampleStore::new());
        let id = Uuid::new_v4();
        // 17:40 から 22:30 まで 10 分ごと
        for k in 0..30 {
            store.insert(sample(id, k * 600, 10.0)).await.unwrap();
        }
        store.refresh_rollup().await.unwrap();
        // まだロールアップされていない
        store.insert(sample(id, 0, 50.0)).await.unwrap();

        let q = query(store.clone());
        let points = q.history(id, Duration::from_secs(6 * 3600), None).await.unwrap();

        assert_eq!(points.len(), 6);
        assert_eq!(points[0].samples, 4);
        assert_eq!(points[5].samples, 2);
        assert!(points.iter().all(|p| p.cpu_max == 10.0));

        let coarse = q
            .history(id, Duration::from_secs(6 * 3600), Some(Duration::from_secs(3 * 3600)))
            .await
            .unwrap();
        assert_eq!(
            coarse.iter().map(|p| p.samples).collect::<Vec<_>>(),
            vec![10, 18, 2]
        );

        // 閾値ちょうどなら生サンプルを使う
        let raw = q.history(id, Duration::from_secs(7200), None).await.unwrap();
        assert!(raw.iter().any(|p| p.cpu_max == 50.0));
    }

    #[tokio::test]
    async fn test_day_history_from_rollup() {
        let store = Arc::new(MemorySampleStore::new());
        let id = Uuid::new_v4();
        // 直近 48 時間、10 分ごと
        for k in 0..288 {
            store.insert(sample(id, k * 600, 5.0)).await.unwrap();
        }
        store.refresh_rollup().await.unwrap();

        let q = query(store);
        let day = q
            .history(id, parse_period("24h").unwrap(), None)
            .await
            .unwrap();

        // 昨日 22:00 から今日 22:00 までの 1 時間バケット
        assert_eq!(day.len(), 25);
        assert!(day.len() <= MAX_HISTORY_POINTS);
        assert!(day.windows(2).all(|w| w[0].bucket > w[1].bucket));
        assert_eq!(day[0].bucket, DateTime::from_timestamp(NOW - 1800, 0).unwrap());
        assert_eq!(day[1].samples, 6);

        let week = q
            .history(id, parse_period("7d").unwrap(), Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        // データは 48 時間分しかない
        assert_eq!(week.len(), 49);
        assert!(week.windows(2).all(|w| w[0].bucket > w[1].bucket));
    }

    #[tokio::test]
    async fn test_history_cap_on_rollup_path() {
        let store = Arc::new(MemorySampleStore::new());
        let id = Uuid::new_v4();
        // 7 日間、1 時間に 1 サンプル
        for k in 0..(7 * 24) {
            store.insert(sample(id, k * 3600, 1.0)).await.unwrap();
        }
        store.refresh_rollup().await.unwrap();

        let points = query(store)
            .history(id, parse_period("7d").unwrap(), Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        assert_eq!(points.len(), MAX_HISTORY_POINTS);
        assert_eq!(points[0].bucket, DateTime::from_timestamp(NOW - 1800, 0).unwrap());
        assert!(points.windows(2).all(|w| w[0].bucket > w[1].bucket));
    }

    #[tokio::test]
    async fn test_period_beyond_calendar_is_rejected() {
        let q = query(Arc::new(MemorySampleStore::new()));
        let id = Uuid::new_v4();
        let period = parse_period("100000000d").unwrap();

        assert!(matches!(
            q.history(id, period, None).await,
            Err(TelemetryError::InvalidPeriod(_))
        ));
        assert!(matches!(
            q.summary(id, period).await,
            Err(TelemetryError::InvalidPeriod(_))
        ));
        assert!(matches!(
            parse_period("999999999999999d"),
            Err(TelemetryError::InvalidPeriod(_))
        ));
    }

    #[tokio::test]
    async fn test_summary() {
        let store = Arc::new(MemorySampleStore::new());
        let id = Uuid::new_v4();
        let q = query(store.clone());
        assert_eq!(
            q.summary(id, Duration::from_secs(600)).await.unwrap(),
            UsageSummary::default()
        );

        store.insert(sample(id, 20, 10.0)).await.unwrap();
        store.insert(sample(id, 10, 30.0)).await.unwrap();

        let summary = q.summary(id, Duration::from_secs(600)).await.unwrap();
        assert_eq!(summary.samples, 2);
        assert_eq!(summary.cpu_avg, 20.0);
        assert_eq!(summary.cpu_max, 30.0);
        assert_eq!(summary.memory_avg, 100);
        assert_eq!(summary.network_total, 22);
    }
}
