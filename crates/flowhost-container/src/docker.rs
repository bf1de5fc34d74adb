//! Docker ランタイムアダプタ (bollard)
//!
//! Docker API と通信する唯一の場所。プロビジョニング、テレメトリ、
//! ネームサービスのスイープが使うランタイムトレイトを実装する。

use crate::converter::{LABEL_MANAGED, LABEL_SUBDOMAIN, parse_image_tag, to_container_config};
use crate::error::{Result, RuntimeError};
use crate::runtime::{ContainerSpec, ProvisioningRuntime, StopOutcome};
use async_trait::async_trait;
use bollard::Docker;
use bollard::models::ContainerCpuStats;
use bollard::query_parameters::{
    InspectContainerOptions, ListContainersOptions, RemoveContainerOptions, RemoveVolumeOptions,
    StartContainerOptions, StatsOptions, StopContainerOptions,
};
use flowhost_dns::{ContainerLister, DnsError, ManagedContainer};
use flowhost_telemetry::{
    CpuCounters, InterfaceCounters, StatsSnapshot, StatsSource, TelemetryError,
};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

const CONNECT_TIMEOUT_SECS: u64 = 120;

pub struct DockerRuntime {
    docker: Docker,
    call_timeout: Duration,
}

impl DockerRuntime {
    /// `host` は `unix://` か `tcp://` のアドレス。`None` ならローカルのデフォルト
    pub fn connect(host: Option<&str>, call_timeout: Duration) -> Result<Self> {
        let docker = match host {
            Some(host) if host.starts_with("unix://") => Docker::connect_with_unix(
                host,
                CONNECT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            Some(host) => Docker::connect_with_http(
                host,
                CONNECT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| RuntimeError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            docker,
            call_timeout,
        })
    }

    pub fn from_client(docker: Docker, call_timeout: Duration) -> Self {
        Self {
            docker,
            call_timeout,
        }
    }

    /// 接続テスト
    pub async fn ping(&self) -> Result<()> {
        self.timed("ping", self.docker.ping()).await?;
        Ok(())
    }

    async fn timed<T, F>(&self, what: &str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, bollard::errors::Error>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result.map_err(RuntimeError::from),
            Err(_) => Err(RuntimeError::Timeout(format!(
                "{} after {:?}",
                what, self.call_timeout
            ))),
        }
    }

    async fn stats_snapshot(&self, container_id: &str) -> Result<StatsSnapshot> {
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut stream = self.docker.stats(container_id, Some(options));

        let stats = match tokio::time::timeout(self.call_timeout, stream.next()).await {
            Ok(Some(stats)) => stats?,
            Ok(None) => {
                return Err(RuntimeError::Api(format!(
                    "empty stats stream for {}",
                    container_id
                )));
            }
            Err(_) => {
                return Err(RuntimeError::Timeout(format!(
                    "stats after {:?}",
                    self.call_timeout
                )));
            }
        };

        let memory = stats.memory_stats.as_ref();
        Ok(StatsSnapshot {
            cpu: cpu_counters(stats.cpu_stats.as_ref()),
            precpu: cpu_counters(stats.precpu_stats.as_ref()),
            memory_usage: memory.and_then(|m| m.usage).unwrap_or(0),
            memory_limit: memory.and_then(|m| m.limit).unwrap_or(0),
            networks: stats
                .networks
                .as_ref()
                .map(|networks| {
                    networks
                        .values()
                        .map(|n| InterfaceCounters {
                            rx_bytes: n.rx_bytes.unwrap_or(0),
                            tx_bytes: n.tx_bytes.unwrap_or(0),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

fn cpu_counters(stats: Option<&ContainerCpuStats>) -> CpuCounters {
    let Some(stats) = stats else {
        return CpuCounters::default();
    };
    let usage = stats.cpu_usage.as_ref();
    CpuCounters {
        total_usage: usage.and_then(|u| u.total_usage).unwrap_or(0),
        system_usage: stats.system_cpu_usage,
        online_cpus: stats.online_cpus,
        percpu_count: usage
            .and_then(|u| u.percpu_usage.as_ref())
            .map(Vec::len)
            .unwrap_or(0),
    }
}

#[async_trait]
impl ProvisioningRuntime for DockerRuntime {
    async fn pull_image(&self, image: &str) -> Result<()> {
        let (from_image, tag) = parse_image_tag(image);
        info!(%image, "pulling image");

        #[allow(deprecated)]
        let options = bollard::image::CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };

        #[allow(deprecated)]
        let mut stream = self.docker.create_image(Some(options), None, None);

        let pull = async {
            while let Some(info) = stream.next().await {
                match info {
                    Ok(bollard::models::CreateImageInfo {
                        status: Some(status),
                        ..
                    }) => debug!(%image, %status, "pull progress"),
                    Ok(_) => {}
                    Err(e) => {
                        return Err(RuntimeError::ImagePullFailed {
                            image: image.to_string(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
            Ok(())
        };

        tokio::time::timeout(self.call_timeout, pull)
            .await
            .map_err(|_| RuntimeError::Timeout(format!("pull {} after {:?}", image, self.call_timeout)))?
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let (config, options) = to_container_config(spec);
        let response = self
            .timed("create", self.docker.create_container(Some(options), config))
            .await?;
        info!(container = %spec.name, container_id = %response.id, "container created");
        Ok(response.id)
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        let call = self
            .docker
            .start_container(container_id, None::<StartContainerOptions>);
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(())) => Ok(()),
            // 304: 既に起動中
            Ok(Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304,
                ..
            })) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(RuntimeError::Timeout(format!(
                "start after {:?}",
                self.call_timeout
            ))),
        }
    }

    async fn stop(&self, container_id: &str, timeout: Duration) -> Result<StopOutcome> {
        let options = StopContainerOptions {
            t: Some(timeout.as_secs() as i32),
            ..Default::default()
        };
        let call = self.docker.stop_container(container_id, Some(options));
        // Docker 側の猶予 + 余裕
        match tokio::time::timeout(timeout + self.call_timeout, call).await {
            Ok(Ok(())) => Ok(StopOutcome::Stopped),
            Ok(Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304,
                ..
            })) => Ok(StopOutcome::AlreadyStopped),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(RuntimeError::Timeout(format!("stop after {:?}", timeout))),
        }
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        self.timed(
            "remove",
            self.docker.remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            ),
        )
        .await
    }

    async fn container_ip(&self, container_id: &str, network: &str) -> Result<String> {
        let info = self
            .timed(
                "inspect",
                self.docker
                    .inspect_container(container_id, None::<InspectContainerOptions>),
            )
            .await?;

        info.network_settings
            .and_then(|settings| settings.networks)
            .and_then(|mut networks| networks.remove(network))
            .and_then(|endpoint| endpoint.ip_address)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| RuntimeError::NoNetworkAddress {
                container: container_id.to_string(),
                network: network.to_string(),
            })
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.timed(
            "remove volume",
            self.docker
                .remove_volume(name, Some(RemoveVolumeOptions { force: true })),
        )
        .await?;
        info!(volume = %name, "volume removed");
        Ok(())
    }
}

#[async_trait]
impl StatsSource for DockerRuntime {
    async fn snapshot(&self, container_id: &str) -> flowhost_telemetry::Result<StatsSnapshot> {
        self.stats_snapshot(container_id)
            .await
            .map_err(|e| TelemetryError::RuntimeUnavailable(e.to_string()))
    }
}

#[async_trait]
impl ContainerLister for DockerRuntime {
    async fn list_managed(&self) -> flowhost_dns::Result<Vec<ManagedContainer>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}=true", LABEL_MANAGED)],
        );
        let options = ListContainersOptions {
            all: true,
            filters: Some(filters),
            ..Default::default()
        };

        let containers = self
            .timed("list", self.docker.list_containers(Some(options)))
            .await
            .map_err(|e| DnsError::ContainerList(e.to_string()))?;

        Ok(containers
            .into_iter()
            .map(|c| ManagedContainer {
                id: c.id.unwrap_or_default(),
                name: c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default(),
                subdomain: c
                    .labels
                    .and_then(|mut labels| labels.remove(LABEL_SUBDOMAIN)),
                running: c
                    .state
                    .map(|s| s.to_string() == "running")
                    .unwrap_or(false),
            })
            .collect())
    }
}
