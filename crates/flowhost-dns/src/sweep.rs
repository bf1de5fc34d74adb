//! 孤立リライトの定期スイープ

use crate::reconciler::{ContainerLister, NameServiceReconciler, SweepReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

pub struct SweepJob {
    reconciler: Arc<NameServiceReconciler>,
    containers: Arc<dyn ContainerLister>,
    interval: Duration,
}

impl SweepJob {
    pub fn new(
        reconciler: Arc<NameServiceReconciler>,
        containers: Arc<dyn ContainerLister>,
        interval: Duration,
    ) -> Self {
        Self {
            reconciler,
            containers,
            interval,
        }
    }

    /// 1 回分のスイープ。失敗はログに出して `None` を返す
    pub async fn run_once(&self) -> Option<SweepReport> {
        match self
            .reconciler
            .sweep_orphans(self.containers.as_ref(), false)
            .await
        {
            Ok(report) => {
                if !report.lingering.is_empty() {
                    info!(lingering = ?report.lingering, "some orphan rewrites survived the sweep");
                }
                Some(report)
            }
            Err(e) => {
                error!(error = %e, "orphan sweep failed");
                None
            }
        }
    }

    /// `shutdown` が true になるまで `interval` ごとにスイープする。
    /// 最初の実行は 1 インターバル経過後
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "orphan sweep started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.run_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("orphan sweep shutting down");
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
    use crate::reconciler::{ManagedContainer, ReconcilePolicy, StaticContainers};
    use crate::service::NameMapping;
    use crate::testing::FlakyNameService;

    #[tokio::test(start_paused = true)]
    async fn test_run_sweeps_until_shutdown() {
        let service = Arc::new(FlakyNameService::with_mappings(vec![
            NameMapping::new("gone.internal", "10.0.0.3"),
            NameMapping::new("live.internal", "10.0.0.1"),
        ]));
        let reconciler = Arc::new(NameServiceReconciler::new(
            service.clone(),
            ReconcilePolicy::default(),
        ));
        let containers = Arc::new(StaticContainers(vec![ManagedContainer {
            id: "c1".to_string(),
            name: "n8n-00000000-live".to_string(),
            subdomain: Some("live".to_string()),
            running: true,
        }]));
        let job = Arc::new(SweepJob::new(
            reconciler,
            containers,
            Duration::from_secs(6 * 3600),
        ));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let job = job.clone();
            async move { job.run(rx).await }
        });

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(service.contains_label("gone.internal").await);

        tokio::time::sleep(Duration::from_secs(6 * 3600)).await;
        assert!(!service.contains_label("gone.internal").await);
        assert!(service.contains_label("live.internal").await);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_once_logs_failure() {
        let service = Arc::new(FlakyNameService::new());
        service.fail_lists(true);
        let job = SweepJob::new(
            Arc::new(NameServiceReconciler::new(service, ReconcilePolicy::default())),
            Arc::new(StaticContainers(vec![])),
            Duration::from_secs(60),
        );
        assert!(job.run_once().await.is_none());
    }
}
