use flowhost_container::testing::FakeRuntime;
use flowhost_container::{Provisioner, ProvisionerConfig, ProvisionerDeps};
use flowhost_core::{MemoryInstanceStore, Plan, PlanQuotas, TaskPool};
use flowhost_dns::testing::FlakyNameService;
use flowhost_dns::{NameServiceReconciler, ReconcilePolicy};
use flowhost_telemetry::{MemorySampleStore, TelemetryCollector};
use std::sync::Arc;

/// インメモリの協調オブジェクトにつないだプロビジョナ
pub struct TestPlatform {
    pub provisioner: Arc<Provisioner>,
    pub runtime: Arc<FakeRuntime>,
    pub names: Arc<FlakyNameService>,
    pub reconciler: Arc<NameServiceReconciler>,
    pub store: Arc<MemoryInstanceStore>,
    pub quotas: Arc<PlanQuotas>,
    pub samples: Arc<MemorySampleStore>,
    pub cleanup: Arc<TaskPool>,
}

impl TestPlatform {
    pub fn new() -> Self {
        Self::with_plan(Plan::Basic)
    }

    pub fn with_plan(plan: Plan) -> Self {
        let store = Arc::new(MemoryInstanceStore::new());
        let runtime = Arc::new(FakeRuntime::new());
        let names = Arc::new(FlakyNameService::new());
        let reconciler = Arc::new(NameServiceReconciler::new(
            names.clone(),
            ReconcilePolicy::default(),
        ));
        let quotas = Arc::new(PlanQuotas::new(plan));
        let samples = Arc::new(MemorySampleStore::new());
        let cleanup = Arc::new(TaskPool::new("cleanup", 2));
        let telemetry = Arc::new(TelemetryCollector::new(
            store.clone(),
            runtime.clone(),
            samples.clone(),
        ));

        let provisioner = Arc::new(Provisioner::new(
            ProvisionerDeps {
                store: store.clone(),
                runtime: runtime.clone(),
                quotas: quotas.clone(),
                dns: reconciler.clone(),
                telemetry,
                cleanup: cleanup.clone(),
            },
            ProvisionerConfig::default(),
        ));

        Self {
            provisioner,
            runtime,
            names,
            reconciler,
            store,
            quotas,
            samples,
            cleanup,
        }
    }
}
