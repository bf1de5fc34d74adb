//! 有効な設定からコンポーネントを組み立てる

use anyhow::Context;
use flowhost_config::Settings;
use flowhost_container::{DockerRuntime, Provisioner, ProvisionerConfig, ProvisionerDeps};
use flowhost_core::{FileInstanceStore, InstanceStore, MemoryInstanceStore, PlanQuotas, TaskPool};
use flowhost_dns::{
    DnsCli, FallbackChain, NameService, NameServiceReconciler, ReconcilePolicy, RewriteApi,
    RewriteApiConfig, SweepJob,
};
use flowhost_telemetry::{MemorySampleStore, RollupJob, SampleStore, Scheduler, TelemetryCollector};
use std::sync::Arc;

pub struct Platform {
    pub settings: Settings,
    pub store: Arc<dyn InstanceStore>,
    pub docker: Arc<DockerRuntime>,
    pub samples: Arc<dyn SampleStore>,
    pub collector: Arc<TelemetryCollector>,
    pub reconciler: Arc<NameServiceReconciler>,
    pub quotas: Arc<PlanQuotas>,
    pub cleanup: Arc<TaskPool>,
    pub provisioner: Provisioner,
}

impl Platform {
    pub async fn build(settings: Settings) -> anyhow::Result<Self> {
        let docker = Arc::new(
            DockerRuntime::connect(settings.docker.host.as_deref(), settings.docker.call_timeout)
                .context("Docker に接続できません")?,
        );
        docker.ping().await.context("Docker が応答しません")?;

        let store: Arc<dyn InstanceStore> = match &settings.state.dir {
            Some(dir) => {
                tracing::info!(dir = %dir.display(), "using file instance store");
                Arc::new(FileInstanceStore::open(dir).await?)
            }
            None => {
                tracing::warn!("state.dir is not set, instance records live in memory only");
                Arc::new(MemoryInstanceStore::new())
            }
        };

        let samples: Arc<dyn SampleStore> = Arc::new(MemorySampleStore::new());
        let collector = Arc::new(TelemetryCollector::new(
            store.clone(),
            docker.clone(),
            samples.clone(),
        ));

        let reconciler = Arc::new(NameServiceReconciler::new(
            name_service(&settings)?,
            ReconcilePolicy {
                verify_delay: settings.dns.verify_delay,
                retry_delay: settings.dns.retry_delay,
                internal_suffix: settings.dns.internal_suffix.clone(),
                excluded_labels: settings.excluded_dns_labels(),
            },
        ));

        let quotas = Arc::new(PlanQuotas::default());
        let cleanup = Arc::new(TaskPool::new(
            "volume-cleanup",
            settings.provisioning.cleanup_workers,
        ));

        let provisioner = Provisioner::new(
            ProvisionerDeps {
                store: store.clone(),
                runtime: docker.clone(),
                quotas: quotas.clone(),
                dns: reconciler.clone(),
                telemetry: collector.clone(),
                cleanup: cleanup.clone(),
            },
            ProvisionerConfig::from_settings(&settings),
        );

        Ok(Self {
            settings,
            store,
            docker,
            samples,
            collector,
            reconciler,
            quotas,
            cleanup,
            provisioner,
        })
    }

    pub fn scheduler(&self) -> Scheduler {
        let monitoring = &self.settings.monitoring;
        Scheduler::new(
            self.store.clone(),
            self.collector.clone(),
            monitoring.interval,
            monitoring.collect_timeout,
            monitoring.max_concurrency,
        )
    }

    pub fn sweep_job(&self) -> SweepJob {
        SweepJob::new(
            self.reconciler.clone(),
            self.docker.clone(),
            self.settings.dns.sweep_interval,
        )
    }

    pub fn rollup_job(&self) -> RollupJob {
        RollupJob::new(
            self.samples.clone(),
            self.settings.telemetry.rollup_refresh,
            self.settings.telemetry.retention,
        )
    }
}

/// ローカルツールがあれば優先し、リライト API をフォールバックにする
fn name_service(settings: &Settings) -> anyhow::Result<Arc<dyn NameService>> {
    let api = RewriteApi::new(RewriteApiConfig {
        base_url: settings.dns.api.base_url(),
        username: settings.dns.api.username.clone(),
        password: settings.dns.api.password.clone(),
        timeout: settings.dns.api.timeout,
    })?;

    let cli = settings
        .dns
        .cli_path
        .as_ref()
        .map(|path| DnsCli::new(path, settings.dns.api.timeout))
        .filter(|cli| {
            let available = cli.is_available();
            if !available {
                tracing::info!(path = %cli.path().display(), "DNS tool not found, using API only");
            }
            available
        })
        .map(|cli| Arc::new(cli) as Arc<dyn NameService>);

    Ok(Arc::new(FallbackChain::new(cli, Arc::new(api))))
}
