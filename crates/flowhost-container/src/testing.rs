//! インメモリのコンテナランタイム

use crate::converter::LABEL_SUBDOMAIN;
use crate::error::{Result, RuntimeError};
use crate::runtime::{ContainerSpec, ProvisioningRuntime, StopOutcome};
use async_trait::async_trait;
use flowhost_dns::{ContainerLister, ManagedContainer};
use flowhost_telemetry::{StatsSnapshot, StatsSource, TelemetryError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub spec: ContainerSpec,
    pub running: bool,
    pub ip: String,
}

#[derive(Default)]
struct FakeState {
    containers: BTreeMap<String, FakeContainer>,
    volumes: BTreeSet<String>,
    pulled: Vec<String>,
}

/// ランタイムのテストダブル。コンテナには連番の ID (`c-1`, ...) と
/// アドレス (`10.1.0.1`, ...) を振る。`fail_*` で対応する呼び出しが
/// エラーになる。
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
    next: AtomicU32,
    pull_delay: Mutex<Duration>,
    stats: Mutex<StatsSnapshot>,
    fail_pull: AtomicBool,
    fail_create: AtomicBool,
    fail_start: AtomicBool,
    fail_inspect: AtomicBool,
    fail_remove: AtomicBool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_pull(&self, fail: bool) {
        self.fail_pull.store(fail, Ordering::SeqCst);
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn fail_inspect(&self, fail: bool) {
        self.fail_inspect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    pub async fn set_pull_delay(&self, delay: Duration) {
        *self.pull_delay.lock().await = delay;
    }

    /// `StatsSource::snapshot` が返すスナップショット
    pub async fn set_stats(&self, snapshot: StatsSnapshot) {
        *self.stats.lock().await = snapshot;
    }

    pub async fn container(&self, id: &str) -> Option<FakeContainer> {
        self.state.lock().await.containers.get(id).cloned()
    }

    pub async fn container_count(&self) -> usize {
        self.state.lock().await.containers.len()
    }

    pub async fn volumes(&self) -> Vec<String> {
        self.state.lock().await.volumes.iter().cloned().collect()
    }

    pub async fn pulled(&self) -> Vec<String> {
        self.state.lock().await.pulled.clone()
    }

    /// プロビジョナを介さずにコンテナを消す
    pub async fn vanish(&self, id: &str) {
        self.state.lock().await.containers.remove(id);
    }

    fn failure(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(RuntimeError::Api(format!("{} failed", what)));
        }
        Ok(())
    }
}

#[async_trait]
impl ProvisioningRuntime for FakeRuntime {
    async fn pull_image(&self, image: &str) -> Result<()> {
        let delay = *self.pull_delay.lock().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_pull.load(Ordering::SeqCst) {
            return Err(RuntimeError::ImagePullFailed {
                image: image.to_string(),
                reason: "manifest unknown".to_string(),
            });
        }
        self.state.lock().await.pulled.push(image.to_string());
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        Self::failure(&self.fail_create, "create")?;
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("c-{}", n);

        let mut state = self.state.lock().await;
        if state.containers.values().any(|c| c.spec.name == spec.name) {
            return Err(RuntimeError::Api(format!(
                "409 Conflict: name {} in use",
                spec.name
            )));
        }
        for (volume, _) in &spec.volumes {
            state.volumes.insert(volume.clone());
        }
        state.containers.insert(
            id.clone(),
            FakeContainer {
                spec: spec.clone(),
                running: false,
                ip: format!("10.1.0.{}", n),
            },
        );
        Ok(id)
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        Self::failure(&self.fail_start, "start")?;
        let mut state = self.state.lock().await;
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| RuntimeError::ContainerNotFound(container_id.to_string()))?;
        container.running = true;
        Ok(())
    }

    async fn stop(&self, container_id: &str, _timeout: Duration) -> Result<StopOutcome> {
        let mut state = self.state.lock().await;
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| RuntimeError::ContainerNotFound(container_id.to_string()))?;
        if !container.running {
            return Ok(StopOutcome::AlreadyStopped);
        }
        container.running = false;
        Ok(StopOutcome::Stopped)
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        Self::failure(&self.fail_remove, "remove")?;
        self.state
            .lock()
            .await
            .containers
            .remove(container_id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::ContainerNotFound(container_id.to_string()))
    }

    async fn container_ip(&self, container_id: &str, network: &str) -> Result<String> {
        Self::failure(&self.fail_inspect, "inspect")?;
        let state = self.state.lock().await;
        let container = state
            .containers
            .get(container_id)
            .ok_or_else(|| RuntimeError::ContainerNotFound(container_id.to_string()))?;
        if !container.running || container.spec.network != network {
            return Err(RuntimeError::NoNetworkAddress {
                container: container_id.to_string(),
                network: network.to_string(),
            });
        }
        Ok(container.ip.clone())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state
            .containers
            .values()
            .any(|c| c.spec.volumes.iter().any(|(v, _)| v == name))
        {
            return Err(RuntimeError::Api(format!("volume {} is in use", name)));
        }
        state.volumes.remove(name);
        Ok(())
    }
}

#[async_trait]
impl StatsSource for FakeRuntime {
    async fn snapshot(&self, container_id: &str) -> flowhost_telemetry::Result<StatsSnapshot> {
        if !self.state.lock().await.containers.contains_key(container_id) {
            return Err(TelemetryError::RuntimeUnavailable(format!(
                "no such container: {}",
                container_id
            )));
        }
        Ok(self.stats.lock().await.clone())
    }
}

#[async_trait]
impl ContainerLister for FakeRuntime {
    async fn list_managed(&self) -> flowhost_dns::Result<Vec<ManagedContainer>> {
        Ok(self
            .state
            .lock()
            .await
            .containers
            .iter()
            .map(|(id, c)| ManagedContainer {
                id: id.clone(),
                name: c.spec.name.clone(),
                subdomain: c.spec.labels.get(LABEL_SUBDOMAIN).cloned(),
                running: c.running,
            })
            .collect())
    }
}
