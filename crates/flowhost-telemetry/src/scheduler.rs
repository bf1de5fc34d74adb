//! 定期収集とロールアップのメンテナンス

use crate::collector::TelemetryCollector;
use crate::store::SampleStore;
use chrono::{TimeDelta, Utc};
use flowhost_core::InstanceStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub dispatched: usize,
    pub collected: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// コンテナのない Pending インスタンス
    pub skipped: usize,
}

/// 削除されていない全インスタンスをインターバルごとに収集する
pub struct Scheduler {
    instances: Arc<dyn InstanceStore>,
    collector: Arc<TelemetryCollector>,
    interval: Duration,
    collect_timeout: Duration,
    permits: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(
        instances: Arc<dyn InstanceStore>,
        collector: Arc<TelemetryCollector>,
        interval: Duration,
        collect_timeout: Duration,
        max_concurrency: usize,
    ) -> Self {
        Self {
            instances,
            collector,
            interval,
            collect_timeout,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    /// 稼働中の全インスタンスを 1 巡する
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        let instances = match self.instances.list_active().await {
            Ok(instances) => instances,
            Err(e) => {
                error!(error = %e, "failed to list instances for collection");
                return report;
            }
        };

        let mut tasks = JoinSet::new();
        for instance in instances {
            if !instance.is_provisioned() {
                report.skipped += 1;
                continue;
            }

            let permits = self.permits.clone();
            let collector = self.collector.clone();
            let timeout = self.collect_timeout;
            report.dispatched += 1;

            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (instance.id, None);
                };
                let result = tokio::time::timeout(timeout, collector.collect(&instance)).await;
                (instance.id, Some(result))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Some(Ok(Ok(_))))) => report.collected += 1,
                Ok((instance_id, Some(Ok(Err(e))))) => {
                    warn!(%instance_id, error = %e, "resource collection failed");
                    report.failed += 1;
                }
                Ok((instance_id, Some(Err(_)))) => {
                    warn!(%instance_id, timeout_ms = self.collect_timeout.as_millis() as u64, "resource collection timed out");
                    report.timed_out += 1;
                }
                Ok((instance_id, None)) => {
                    warn!(%instance_id, "collection semaphore closed");
                    report.failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "collection task panicked");
                    report.failed += 1;
                }
            }
        }

        debug!(
            dispatched = report.dispatched,
            collected = report.collected,
            failed = report.failed,
            timed_out = report.timed_out,
            "collection tick finished"
        );
        report
    }

    /// `shutdown` が true になるまでインターバルごとに実行する
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            timeout_ms = self.collect_timeout.as_millis() as u64,
            "resource scheduler started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("resource scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// 時間単位ロールアップを更新し、保持期間を適用する
pub struct RollupJob {
    samples: Arc<dyn SampleStore>,
    refresh_interval: Duration,
    retention: Duration,
}

impl RollupJob {
    pub fn new(samples: Arc<dyn SampleStore>, refresh_interval: Duration, retention: Duration) -> Self {
        Self {
            samples,
            refresh_interval,
            retention,
        }
    }

    pub async fn run_once(&self) {
        match self.samples.refresh_rollup().await {
            Ok(rows) => debug!(rows, "rollup refreshed"),
            Err(e) => warn!(error = %e, "rollup refresh failed"),
        }

        let Ok(retention) = TimeDelta::from_std(self.retention) else {
            warn!(retention = ?self.retention, "retention out of range, skipping prune");
            return;
        };
        match self.samples.prune(Utc::now() - retention).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "pruned expired resource samples"),
            Err(e) => warn!(error = %e, "sample prune failed"),
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.refresh_interval.as_secs(),
            retention_secs = self.retention.as_secs(),
            "rollup job started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.refresh_interval) => {
                    self.run_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("rollup job shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::StatsSnapshot;
    use crate::store::MemorySampleStore;
    use crate::testing::ScriptedStats;
    use flowhost_core::{CreateRequest, Instance, InstanceStatus, MemoryInstanceStore, Plan};
    use uuid::Uuid;

    async fn add_instance(
        store: &MemoryInstanceStore,
        container: Option<&str>,
        status: InstanceStatus,
    ) -> Instance {
        let mut instance = Instance::pending(
            Uuid::new_v4(),
            &CreateRequest::new("app"),
            "n8n-00000000-app",
            "brave-lynx",
            "launchstack.io",
            &Plan::Pro.quota(),
            "deadbeef",
        );
        if let Some(container) = container {
            instance.attach_container(container);
            instance.set_status(status);
        }
        store.insert(&instance).await.unwrap();
        instance
    }

    fn setup(
        source: Arc<ScriptedStats>,
    ) -> (Arc<MemoryInstanceStore>, Arc<MemorySampleStore>, Scheduler) {
        let instances = Arc::new(MemoryInstanceStore::new());
        let samples = Arc::new(MemorySampleStore::new());
        let collector = Arc::new(TelemetryCollector::new(
            instances.clone(),
            source,
            samples.clone(),
        ));
        let scheduler = Scheduler::new(
            instances.clone(),
            collector,
            Duration::from_secs(30),
            Duration::from_secs(5),
            4,
        );
        (instances, samples, scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_isolates_failures_and_timeouts() {
        let source = Arc::new(ScriptedStats::repeating(StatsSnapshot::default()));
        source.fail("c-bad").await;
        source.delay("c-slow", Duration::from_secs(60)).await;
        let (instances, samples, scheduler) = setup(source);

        add_instance(&instances, Some("c-ok"), InstanceStatus::Running).await;
        add_instance(&instances, Some("c-stopped"), InstanceStatus::Stopped).await;
        add_instance(&instances, Some("c-bad"), InstanceStatus::Running).await;
        add_instance(&instances, Some("c-slow"), InstanceStatus::Running).await;
        add_instance(&instances, None, InstanceStatus::Pending).await;
        let mut deleted = add_instance(&instances, Some("c-gone"), InstanceStatus::Running).await;
        deleted.set_status(InstanceStatus::Deleted);
        instances.update(&deleted).await.unwrap();

        let report = scheduler.tick().await;
        assert_eq!(
            report,
            TickReport {
                dispatched: 4,
                collected: 2,
                failed: 1,
                timed_out: 1,
                skipped: 1,
            }
        );
        assert_eq!(samples.len().await, 2);

        // 次のティックには影響しない
        let again = scheduler.tick().await;
        assert_eq!(again.collected, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_shutdown() {
        let source = Arc::new(ScriptedStats::repeating(StatsSnapshot::default()));
        let (instances, samples, scheduler) = setup(source);
        add_instance(&instances, Some("c-1"), InstanceStatus::Running).await;

        let scheduler = Arc::new(scheduler);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run(rx).await }
        });

        // 0, 30, 60 でティック
        tokio::time::sleep(Duration::from_secs(75)).await;
        assert_eq!(samples.len().await, 3);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_rollup_job_run_once() {
        let samples = Arc::new(MemorySampleStore::new());
        let id = Uuid::new_v4();
        samples
            .insert(flowhost_core::ResourceSample {
                instance_id: id,
                timestamp: Utc::now(),
                cpu_percent: 1.0,
                memory_usage: 1,
                memory_limit: 2,
                memory_percent: 50.0,
                network_in: 0,
                network_out: 0,
            })
            .await
            .unwrap();
        let old = Utc::now() - TimeDelta::days(40);
        samples
            .insert(flowhost_core::ResourceSample {
                instance_id: id,
                timestamp: old,
                cpu_percent: 1.0,
                memory_usage: 1,
                memory_limit: 2,
                memory_percent: 50.0,
                network_in: 0,
                network_out: 0,
            })
            .await
            .unwrap();

        let job = RollupJob::new(
            samples.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(30 * 86400),
        );
        job.run_once().await;

        assert_eq!(samples.len().await, 1);
        assert!(!samples.rollup_window(id, Utc::now() - TimeDelta::hours(2)).await.unwrap().is_empty());
    }
}
