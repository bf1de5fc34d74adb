//! インスタンスのライフサイクル: 作成・起動・停止・再起動・削除
//!
//! 同じインスタンスへの呼び出しはインスタンスごとのロックで直列化する。
//! クォータチェックは check-then-act なのでソフトリミット。同じオーナーの
//! 並行した作成は両方とも通りうる。

use crate::converter::instance_spec;
use crate::error::{ProvisionError, RuntimeError};
use crate::runtime::ProvisioningRuntime;
use flowhost_config::Settings;
use flowhost_core::naming::{container_identifier, salted_subdomain, volume_names};
use flowhost_core::{
    CreateRequest, Instance, InstanceStatus, InstanceStore, Outcome, QuotaProvider,
    ResourceSample, SideEffect, SideEffectKind, TaskPool,
};
use flowhost_dns::{BindOutcome, NameServiceReconciler, UnbindOutcome};
use flowhost_telemetry::{TelemetryCollector, TelemetryError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};
use uuid::Uuid;

type Result<T> = std::result::Result<T, ProvisionError>;

#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// 公開ドメイン。インスタンスの URL は `<subdomain>.<domain>`
    pub domain: String,
    pub internal_suffix: String,
    pub base_image: String,
    pub network: String,
    pub stop_timeout: Duration,
    pub volume_cleanup_delay: Duration,
    pub volume_cleanup_timeout: Duration,
    pub max_subdomain_attempts: u32,
}

impl ProvisionerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            domain: settings.server.domain.clone(),
            internal_suffix: settings.dns.internal_suffix.clone(),
            base_image: settings.docker.base_image.clone(),
            network: settings.docker.network.clone(),
            stop_timeout: settings.docker.stop_timeout,
            volume_cleanup_delay: settings.provisioning.volume_cleanup_delay,
            volume_cleanup_timeout: settings.provisioning.volume_cleanup_timeout,
            max_subdomain_attempts: settings.provisioning.max_subdomain_attempts,
        }
    }
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// プロビジョナの協調オブジェクト
pub struct ProvisionerDeps {
    pub store: Arc<dyn InstanceStore>,
    pub runtime: Arc<dyn ProvisioningRuntime>,
    pub quotas: Arc<dyn QuotaProvider>,
    pub dns: Arc<NameServiceReconciler>,
    pub telemetry: Arc<TelemetryCollector>,
    pub cleanup: Arc<TaskPool>,
}

pub struct Provisioner {
    store: Arc<dyn InstanceStore>,
    runtime: Arc<dyn ProvisioningRuntime>,
    quotas: Arc<dyn QuotaProvider>,
    dns: Arc<NameServiceReconciler>,
    telemetry: Arc<TelemetryCollector>,
    cleanup: Arc<TaskPool>,
    config: ProvisionerConfig,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

/// 16 進 8 文字
fn generate_password() -> String {
    let mut password = Uuid::new_v4().simple().to_string();
    password.truncate(8);
    password
}

impl Provisioner {
    pub fn new(deps: ProvisionerDeps, config: ProvisionerConfig) -> Self {
        Self {
            store: deps.store,
            runtime: deps.runtime,
            quotas: deps.quotas,
            dns: deps.dns,
            telemetry: deps.telemetry,
            cleanup: deps.cleanup,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    async fn lock_instance(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self.locks.lock().await.entry(id).or_default().clone();
        lock.lock_owned().await
    }

    /// 他の呼び出しが保持・待機していなければ `id` のロックエントリを消す
    async fn release_lock(&self, id: Uuid) {
        let mut locks = self.locks.lock().await;
        if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&id);
        }
    }

    /// 生きているインスタンスをロックして読み込む。
    ///
    /// 未知または削除済みのインスタンスはロックエントリを作る前に拒否するので、
    /// 解決できない ID は何も残さない。
    async fn acquire(
        &self,
        id: Uuid,
        action: &'static str,
    ) -> Result<(OwnedMutexGuard<()>, Instance)> {
        self.ensure_live(self.load(id).await?, action)?;

        let guard = self.lock_instance(id).await;
        let loaded = self
            .load(id)
            .await
            .and_then(|instance| self.ensure_live(instance, action));
        match loaded {
            Ok(instance) => Ok((guard, instance)),
            Err(e) => {
                drop(guard);
                self.release_lock(id).await;
                Err(e)
            }
        }
    }

    fn ensure_live(&self, instance: Instance, action: &'static str) -> Result<Instance> {
        if instance.status.is_deleted() {
            return Err(ProvisionError::InvalidState {
                id: instance.id,
                status: instance.status,
                action,
            });
        }
        Ok(instance)
    }

    #[cfg(test)]
    async fn lock_entries(&self) -> usize {
        self.locks.lock().await.len()
    }

    async fn load(&self, id: Uuid) -> Result<Instance> {
        self.store
            .get(id)
            .await?
            .ok_or(ProvisionError::NotFound(id))
    }

    /// 回復不能なランタイム障害の後にインスタンスを `error` にする
    async fn mark_error(&self, instance: &mut Instance, cause: &RuntimeError) {
        error!(instance_id = %instance.id, error = %cause, "runtime failure, marking instance as error");
        instance.set_status(InstanceStatus::Error);
        if let Err(e) = self.store.update(instance).await {
            error!(instance_id = %instance.id, error = %e, "failed to persist error status");
        }
    }

    async fn free_subdomain(&self, identifier: &str) -> Result<String> {
        let taken: HashSet<String> = self
            .store
            .list_active()
            .await?
            .into_iter()
            .map(|i| i.subdomain)
            .collect();

        for attempt in 0..self.config.max_subdomain_attempts.max(1) {
            let candidate = salted_subdomain(identifier, attempt);
            if !taken.contains(&candidate) {
                if attempt > 0 {
                    info!(%identifier, %candidate, attempt, "subdomain collision resolved");
                }
                return Ok(candidate);
            }
        }
        Err(ProvisionError::SubdomainExhausted(identifier.to_string()))
    }

    async fn bind_effect(&self, instance: &Instance, ip: &str) -> SideEffect {
        let label = instance.dns_label(&self.config.internal_suffix);
        match self.dns.bind(&label, ip).await {
            Ok(BindOutcome::Created) => SideEffect::ok(SideEffectKind::DnsBind, "created"),
            Ok(BindOutcome::Unchanged) => SideEffect::ok(SideEffectKind::DnsBind, "unchanged"),
            Ok(BindOutcome::Replaced { previous }) => {
                SideEffect::ok(SideEffectKind::DnsBind, format!("replaced {}", previous))
            }
            Err(e) => SideEffect::failed(SideEffectKind::DnsBind, e),
        }
    }

    /// `owner_id` の新しいインスタンスをプロビジョニングする。
    ///
    /// 致命的: クォータ、名前の重複、イメージ取得、コンテナの作成・起動・inspect。
    /// DNS 登録は副作用。
    pub async fn create(&self, owner_id: Uuid, request: CreateRequest) -> Result<Outcome<Instance>> {
        let quota = self.quotas.quota_for(owner_id).await;
        let active = self.store.count_active_for_owner(owner_id).await?;
        if active >= quota.max_instances {
            warn!(%owner_id, active, limit = quota.max_instances, "instance quota exceeded");
            return Err(ProvisionError::QuotaExceeded {
                owner_id,
                limit: quota.max_instances,
            });
        }

        let identifier = container_identifier(owner_id, &request.name);
        let duplicate = self
            .store
            .list_by_owner(owner_id)
            .await?
            .iter()
            .any(|i| i.container_name == identifier);
        if duplicate {
            return Err(ProvisionError::Conflict(request.name));
        }

        let subdomain = self.free_subdomain(&identifier).await?;

        self.runtime.pull_image(&self.config.base_image).await?;

        let mut instance = Instance::pending(
            owner_id,
            &request,
            identifier,
            subdomain,
            &self.config.domain,
            &quota,
            generate_password(),
        );
        self.store.insert(&instance).await?;
        let guard = self.lock_instance(instance.id).await;
        info!(
            instance_id = %instance.id,
            %owner_id,
            container = %instance.container_name,
            subdomain = %instance.subdomain,
            "provisioning instance"
        );

        let spec = instance_spec(&instance, &self.config.base_image, &self.config.network);
        let container_id = match self.runtime.create(&spec).await {
            Ok(id) => id,
            Err(e) => {
                error!(instance_id = %instance.id, error = %e, "container create failed");
                if let Err(se) = self.store.remove(instance.id).await {
                    error!(instance_id = %instance.id, error = %se, "failed to remove pending record");
                }
                drop(guard);
                self.release_lock(instance.id).await;
                return Err(e.into());
            }
        };

        instance.attach_container(container_id.clone());
        self.store.update(&instance).await?;

        if let Err(e) = self.runtime.start(&container_id).await {
            self.mark_error(&mut instance, &e).await;
            return Err(e.into());
        }
        let ip = match self
            .runtime
            .container_ip(&container_id, &self.config.network)
            .await
        {
            Ok(ip) => ip,
            Err(e) => {
                self.mark_error(&mut instance, &e).await;
                return Err(e.into());
            }
        };

        instance.container_ip = Some(ip.clone());
        let bind = self.bind_effect(&instance, &ip).await;

        instance.set_status(InstanceStatus::Running);
        self.store.update(&instance).await?;
        info!(instance_id = %instance.id, container_id = %container_id, %ip, url = %instance.url, "instance running");

        let mut outcome = Outcome::new(instance);
        outcome.push(bind);
        Ok(outcome)
    }

    /// 停止中 (またはエラー) のインスタンスを起動し、DNS 登録を更新する
    pub async fn start(&self, id: Uuid) -> Result<Outcome<Instance>> {
        let (_guard, mut instance) = self.acquire(id, "start").await?;
        let container_id = instance
            .container_id
            .clone()
            .ok_or(ProvisionError::NoRuntimeHandle(id))?;
        if !instance.status.can_start() {
            return Err(ProvisionError::InvalidState {
                id,
                status: instance.status,
                action: "start",
            });
        }

        match self.runtime.start(&container_id).await {
            Ok(()) => {}
            Err(e @ RuntimeError::ContainerNotFound(_)) => {
                self.mark_error(&mut instance, &e).await;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        }
        instance.set_status(InstanceStatus::Running);

        let bind = match self
            .runtime
            .container_ip(&container_id, &self.config.network)
            .await
        {
            Ok(ip) => {
                instance.container_ip = Some(ip.clone());
                self.bind_effect(&instance, &ip).await
            }
            Err(e) => SideEffect::failed(SideEffectKind::DnsBind, e),
        };

        self.store.update(&instance).await?;
        info!(instance_id = %id, container_id = %container_id, "instance started");

        let mut outcome = Outcome::new(instance);
        outcome.push(bind);
        Ok(outcome)
    }

    /// 稼働中 (またはエラー) のインスタンスを停止する
    pub async fn stop(&self, id: Uuid) -> Result<Instance> {
        let (_guard, mut instance) = self.acquire(id, "stop").await?;
        let container_id = instance
            .container_id
            .clone()
            .ok_or(ProvisionError::NoRuntimeHandle(id))?;
        if !instance.status.can_stop() {
            return Err(ProvisionError::InvalidState {
                id,
                status: instance.status,
                action: "stop",
            });
        }

        match self
            .runtime
            .stop(&container_id, self.config.stop_timeout)
            .await
        {
            Ok(outcome) => {
                info!(instance_id = %id, container_id = %container_id, ?outcome, "instance stopped")
            }
            Err(e @ RuntimeError::ContainerNotFound(_)) => {
                self.mark_error(&mut instance, &e).await;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        }

        instance.set_status(InstanceStatus::Stopped);
        self.store.update(&instance).await?;
        Ok(instance)
    }

    /// (稼働中なら) 停止して再度起動する
    pub async fn restart(&self, id: Uuid) -> Result<Outcome<Instance>> {
        let instance = self.load(id).await?;
        if instance.status.can_stop() {
            self.stop(id).await?;
        }
        self.start(id).await
    }

    /// インスタンスを撤去する。
    ///
    /// 致命的なのはコンテナ削除の失敗だけ。DNS 解除と遅延ボリューム削除は
    /// 副作用で、結果にかかわらずレコードは `deleted` になる。
    pub async fn delete(&self, id: Uuid) -> Result<Outcome<Instance>> {
        let (guard, mut instance) = self.acquire(id, "delete").await?;

        let mut effects = Vec::new();

        if let Some(container_id) = instance.container_id.clone() {
            effects.push(
                match self
                    .runtime
                    .stop(&container_id, self.config.stop_timeout)
                    .await
                {
                    Ok(outcome) => {
                        SideEffect::ok(SideEffectKind::ContainerStop, format!("{:?}", outcome))
                    }
                    Err(RuntimeError::ContainerNotFound(_)) => {
                        SideEffect::ok(SideEffectKind::ContainerStop, "container already gone")
                    }
                    Err(e) => SideEffect::failed(SideEffectKind::ContainerStop, e),
                },
            );

            match self.runtime.remove(&container_id).await {
                Ok(()) => info!(instance_id = %id, container_id = %container_id, "container removed"),
                Err(RuntimeError::ContainerNotFound(_)) => {
                    warn!(instance_id = %id, container_id = %container_id, "container already gone")
                }
                Err(e) => {
                    error!(instance_id = %id, container_id = %container_id, error = %e, "container remove failed");
                    return Err(e.into());
                }
            }
        }

        let label = instance.dns_label(&self.config.internal_suffix);
        effects.push(match self.dns.unbind(&label).await {
            Ok(UnbindOutcome::Removed { attempts }) => SideEffect::ok(
                SideEffectKind::DnsUnbind,
                format!("removed after {} attempt(s)", attempts),
            ),
            Ok(UnbindOutcome::Absent) => SideEffect::ok(SideEffectKind::DnsUnbind, "absent"),
            Ok(UnbindOutcome::Lingering) => SideEffect::failed(
                SideEffectKind::DnsUnbind,
                format!("{} still present, left for the orphan sweep", label),
            ),
            Err(e) => SideEffect::failed(SideEffectKind::DnsUnbind, e),
        });

        if instance.is_provisioned() {
            effects.push(self.schedule_volume_cleanup(&instance).await);
        }

        instance.set_status(InstanceStatus::Deleted);
        self.store.update(&instance).await?;
        self.telemetry.forget(id).await;

        drop(guard);
        self.release_lock(id).await;
        info!(instance_id = %id, "instance deleted");

        let mut outcome = Outcome::new(instance);
        for effect in effects {
            outcome.push(effect);
        }
        Ok(outcome)
    }

    async fn schedule_volume_cleanup(&self, instance: &Instance) -> SideEffect {
        let (data, files) = volume_names(&instance.container_name);
        let runtime = self.runtime.clone();
        let task_id = self
            .cleanup
            .submit(
                format!("remove volumes of {}", instance.container_name),
                self.config.volume_cleanup_delay,
                self.config.volume_cleanup_timeout,
                async move {
                    let first = runtime.remove_volume(&data).await;
                    let second = runtime.remove_volume(&files).await;
                    first.and(second)
                },
            )
            .await;
        info!(instance_id = %instance.id, %task_id, "volume cleanup scheduled");
        SideEffect::ok(SideEffectKind::VolumeCleanup, task_id)
    }

    /// 現在のリソースサンプル (要求時に収集)
    pub async fn stats(&self, id: Uuid) -> Result<ResourceSample> {
        self.telemetry
            .collect_by_id(id)
            .await
            .map_err(|e| match e {
                TelemetryError::InstanceNotFound(id) => ProvisionError::NotFound(id),
                TelemetryError::NoRuntimeHandle(id) => ProvisionError::NoRuntimeHandle(id),
                other => other.into(),
            })
    }

    pub async fn get(&self, id: Uuid) -> Result<Instance> {
        self.load(id).await
    }

    /// オーナーの削除されていないインスタンス
    pub async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<Instance>> {
        let mut instances = self.store.list_by_owner(owner_id).await?;
        instances.sort_by_key(|i| i.created_at);
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;
    use flowhost_core::{MemoryInstanceStore, Plan, PlanQuotas};
    use flowhost_dns::ReconcilePolicy;
    use flowhost_dns::testing::FlakyNameService;
    use flowhost_telemetry::MemorySampleStore;

    struct Harness {
        provisioner: Provisioner,
        runtime: Arc<FakeRuntime>,
        names: Arc<FlakyNameService>,
        store: Arc<MemoryInstanceStore>,
        quotas: Arc<PlanQuotas>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryInstanceStore::new());
        let runtime = Arc::new(FakeRuntime::new());
        let names = Arc::new(FlakyNameService::new());
        let quotas = Arc::new(PlanQuotas::new(Plan::Basic));
        let telemetry = Arc::new(TelemetryCollector::new(
            store.clone(),
            runtime.clone(),
            Arc::new(MemorySampleStore::new()),
        ));
        let provisioner = Provisioner::new(
            ProvisionerDeps {
                store: store.clone(),
                runtime: runtime.clone(),
                quotas: quotas.clone(),
                dns: Arc::new(NameServiceReconciler::new(
                    names.clone(),
                    ReconcilePolicy::default(),
                )),
                telemetry,
                cleanup: Arc::new(TaskPool::new("cleanup", 2)),
            },
            ProvisionerConfig::default(),
        );
        Harness {
            provisioner,
            runtime,
            names,
            store,
            quotas,
        }
    }

    #[tokio::test]
    async fn test_create_binds_dns() {
        let h = harness();
        let owner = Uuid::new_v4();
        let outcome = h
            .provisioner
            .create(owner, CreateRequest::new("My App"))
            .await
            .unwrap();

        assert!(outcome.all_side_effects_ok());
        let instance = outcome.primary;
        assert_eq!(instance.status, InstanceStatus::Running);
        assert_eq!(instance.container_ip.as_deref(), Some("10.1.0.1"));
        assert_eq!(instance.basic_auth_password.len(), 8);
        assert!(instance.url.ends_with(".launchstack.io"));
        assert!(
            h.names
                .contains_label(&format!("{}.internal", instance.subdomain))
                .await
        );
        assert_eq!(h.runtime.pulled().await, vec!["n8nio/n8n:latest"]);
    }

    #[tokio::test]
    async fn test_create_quota_exceeded_creates_nothing() {
        let h = harness();
        let owner = Uuid::new_v4();
        h.quotas.assign(owner, Plan::Free).await;

        h.provisioner
            .create(owner, CreateRequest::new("one"))
            .await
            .unwrap();
        let err = h
            .provisioner
            .create(owner, CreateRequest::new("two"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), flowhost_core::ErrorKind::QuotaExceeded);
        assert_eq!(h.store.list_active().await.unwrap().len(), 1);
        assert_eq!(h.runtime.container_count().await, 1);
    }

    #[tokio::test]
    async fn test_create_duplicate_name_conflicts() {
        let h = harness();
        let owner = Uuid::new_v4();
        h.provisioner
            .create(owner, CreateRequest::new("My App"))
            .await
            .unwrap();
        let err = h
            .provisioner
            .create(owner, CreateRequest::new("my_app"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_subdomain_collision_uses_salted_candidate() {
        let h = harness();
        let owner = Uuid::new_v4();
        let identifier = container_identifier(owner, "app");

        // 最初の候補は別オーナーのインスタンスが使用中
        let mut squatter = Instance::pending(
            Uuid::new_v4(),
            &CreateRequest::new("other"),
            "n8n-ffffffff-other",
            salted_subdomain(&identifier, 0),
            "launchstack.io",
            &Plan::Free.quota(),
            "deadbeef",
        );
        squatter.attach_container("c-x");
        h.store.insert(&squatter).await.unwrap();

        let instance = h
            .provisioner
            .create(owner, CreateRequest::new("app"))
            .await
            .unwrap()
            .into_primary();
        assert_eq!(instance.subdomain, salted_subdomain(&identifier, 1));
    }

    #[tokio::test]
    async fn test_create_pull_failure_is_fatal_and_leaves_nothing() {
        let h = harness();
        h.runtime.fail_pull(true);
        let err = h
            .provisioner
            .create(Uuid::new_v4(), CreateRequest::new("app"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), flowhost_core::ErrorKind::RuntimeFailure);
        assert!(h.store.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_container_failure_removes_pending_record() {
        let h = harness();
        h.runtime.fail_create(true);
        assert!(
            h.provisioner
                .create(Uuid::new_v4(), CreateRequest::new("app"))
                .await
                .is_err()
        );
        assert!(h.store.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_start_failure_marks_error_and_keeps_handle() {
        let h = harness();
        h.runtime.fail_start(true);
        let owner = Uuid::new_v4();
        assert!(
            h.provisioner
                .create(owner, CreateRequest::new("app"))
                .await
                .is_err()
        );

        let instances = h.store.list_by_owner(owner).await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].status, InstanceStatus::Error);
        assert!(instances[0].container_id.is_some());
        assert!(instances[0].lifecycle_consistent());
    }

    #[tokio::test]
    async fn test_create_dns_failure_is_side_effect() {
        let h = harness();
        h.names.fail_adds(true);
        let outcome = h
            .provisioner
            .create(Uuid::new_v4(), CreateRequest::new("app"))
            .await
            .unwrap();
        assert_eq!(outcome.primary.status, InstanceStatus::Running);
        assert!(!outcome.side_effect(SideEffectKind::DnsBind).unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_start_stop_transitions() {
        let h = harness();
        let id = h
            .provisioner
            .create(Uuid::new_v4(), CreateRequest::new("app"))
            .await
            .unwrap()
            .primary
            .id;

        let err = h.provisioner.start(id).await.unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidState { .. }));

        let stopped = h.provisioner.stop(id).await.unwrap();
        assert_eq!(stopped.status, InstanceStatus::Stopped);
        let err = h.provisioner.stop(id).await.unwrap_err();
        assert_eq!(err.kind(), flowhost_core::ErrorKind::InvalidState);

        let started = h.provisioner.start(id).await.unwrap();
        assert_eq!(started.primary.status, InstanceStatus::Running);
        assert_eq!(
            started.side_effect(SideEffectKind::DnsBind).unwrap().result,
            Ok("unchanged".to_string())
        );

        let restarted = h.provisioner.restart(id).await.unwrap();
        assert_eq!(restarted.primary.status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn test_unknown_and_unprovisioned_instances() {
        let h = harness();
        let missing = Uuid::new_v4();
        assert!(matches!(
            h.provisioner.start(missing).await,
            Err(ProvisionError::NotFound(_))
        ));
        assert!(matches!(
            h.provisioner.get(missing).await,
            Err(ProvisionError::NotFound(_))
        ));

        let pending = Instance::pending(
            Uuid::new_v4(),
            &CreateRequest::new("p"),
            "n8n-00000000-p",
            "calm-fern",
            "launchstack.io",
            &Plan::Free.quota(),
            "deadbeef",
        );
        h.store.insert(&pending).await.unwrap();
        assert!(matches!(
            h.provisioner.stop(pending.id).await,
            Err(ProvisionError::NoRuntimeHandle(_))
        ));
        assert!(matches!(
            h.provisioner.stats(pending.id).await,
            Err(ProvisionError::NoRuntimeHandle(_))
        ));
    }

    #[tokio::test]
    async fn test_vanished_container_marks_error() {
        let h = harness();
        let instance = h
            .provisioner
            .create(Uuid::new_v4(), CreateRequest::new("app"))
            .await
            .unwrap()
            .primary;
        h.runtime
            .vanish(instance.container_id.as_deref().unwrap())
            .await;

        let err = h.provisioner.stop(instance.id).await.unwrap_err();
        assert_eq!(err.kind(), flowhost_core::ErrorKind::RuntimeFailure);
        assert_eq!(
            h.provisioner.get(instance.id).await.unwrap().status,
            InstanceStatus::Error
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_removes_container_dns_and_volumes() {
        let h = harness();
        let instance = h
            .provisioner
            .create(Uuid::new_v4(), CreateRequest::new("app"))
            .await
            .unwrap()
            .primary;
        assert_eq!(h.runtime.volumes().await.len(), 2);

        let outcome = h.provisioner.delete(instance.id).await.unwrap();
        assert_eq!(outcome.primary.status, InstanceStatus::Deleted);
        assert!(outcome.all_side_effects_ok());
        assert_eq!(h.runtime.container_count().await, 0);
        assert!(h.names.snapshot().await.is_empty());

        // ボリュームは削除遅延の後に消える
        assert_eq!(h.runtime.volumes().await.len(), 2);
        let reports = h.provisioner.cleanup.drain().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].result, Ok(()));
        assert!(h.runtime.volumes().await.is_empty());

        let err = h.provisioner.delete(instance.id).await.unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidState { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_remove_failure_is_fatal() {
        let h = harness();
        let instance = h
            .provisioner
            .create(Uuid::new_v4(), CreateRequest::new("app"))
            .await
            .unwrap()
            .primary;
        h.runtime.fail_remove(true);

        assert!(h.provisioner.delete(instance.id).await.is_err());
        assert_ne!(
            h.provisioner.get(instance.id).await.unwrap().status,
            InstanceStatus::Deleted
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_with_lingering_dns_still_deletes() {
        let h = harness();
        let instance = h
            .provisioner
            .create(Uuid::new_v4(), CreateRequest::new("app"))
            .await
            .unwrap()
            .primary;
        h.names.ignore_deletes(2);

        let outcome = h.provisioner.delete(instance.id).await.unwrap();
        assert_eq!(outcome.primary.status, InstanceStatus::Deleted);
        assert!(!outcome.side_effect(SideEffectKind::DnsUnbind).unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_and_deleted_ids_leave_no_lock_entries() {
        let h = harness();
        for _ in 0..5 {
            let missing = Uuid::new_v4();
            assert!(h.provisioner.start(missing).await.is_err());
            assert!(h.provisioner.stop(missing).await.is_err());
            assert!(h.provisioner.delete(missing).await.is_err());
            assert!(h.provisioner.restart(missing).await.is_err());
        }
        assert_eq!(h.provisioner.lock_entries().await, 0);

        let instance = h
            .provisioner
            .create(Uuid::new_v4(), CreateRequest::new("app"))
            .await
            .unwrap()
            .primary;
        assert_eq!(h.provisioner.lock_entries().await, 1);
        h.provisioner.delete(instance.id).await.unwrap();
        assert_eq!(h.provisioner.lock_entries().await, 0);

        // 削除済みインスタンスへの再呼び出しはロックなしで拒否される
        let err = h.provisioner.start(instance.id).await.unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidState { action: "start", .. }));
        assert!(h.provisioner.delete(instance.id).await.is_err());
        assert_eq!(h.provisioner.lock_entries().await, 0);
    }

    #[tokio::test]
    async fn test_failed_create_leaves_no_lock_entry() {
        let h = harness();
        h.runtime.fail_create(true);
        assert!(
            h.provisioner
                .create(Uuid::new_v4(), CreateRequest::new("app"))
                .await
                .is_err()
        );
        assert_eq!(h.provisioner.lock_entries().await, 0);
    }

    #[tokio::test]
    async fn test_list_for_owner_excludes_deleted() {
        let h = harness();
        let owner = Uuid::new_v4();
        let a = h
            .provisioner
            .create(owner, CreateRequest::new("a"))
            .await
            .unwrap()
            .primary;
        h.provisioner
            .create(owner, CreateRequest::new("b"))
            .await
            .unwrap();
        h.provisioner
            .create(Uuid::new_v4(), CreateRequest::new("c"))
            .await
            .unwrap();

        let mut deleted = a.clone();
        deleted.set_status(InstanceStatus::Deleted);
        h.store.update(&deleted).await.unwrap();

        let listed = h.provisioner.list_for_owner(owner).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "b");
    }
}
