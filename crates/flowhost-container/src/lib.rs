//! flowhost-container
//!
//! n8n インスタンスのプロビジョニングエンジン: コンテナランタイムの境界、
//! その Docker 実装、そしてインスタンスを作成・起動・停止・削除する
//! プロビジョナ。

pub mod converter;
pub mod docker;
pub mod error;
pub mod provisioner;
pub mod runtime;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use converter::{
    LABEL_INSTANCE, LABEL_MANAGED, LABEL_OWNER, LABEL_SUBDOMAIN, instance_spec, parse_image_tag,
    to_container_config,
};
pub use docker::DockerRuntime;
pub use error::{ProvisionError, Result, RuntimeError};
pub use provisioner::{Provisioner, ProvisionerConfig, ProvisionerDeps};
pub use runtime::{ContainerSpec, N8N_PORT, ProvisioningRuntime, StopOutcome};
