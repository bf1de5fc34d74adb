//! flowhost-dns
//!
//! インスタンスの内部ネームサービス登録: リライト API クライアント、
//! ローカルツールによるフォールバック、そして登録・解除と
//! 孤立リライトの掃除を行うリコンサイラ。

pub mod api;
pub mod cli;
pub mod error;
pub mod reconciler;
pub mod service;
pub mod sweep;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use api::{RewriteApi, RewriteApiConfig};
pub use cli::DnsCli;
pub use error::{DnsError, Result};
pub use reconciler::{
    BindOutcome, ContainerLister, ManagedContainer, NameServiceReconciler, ReconcilePolicy,
    StaticContainers, SweepReport, UnavailableContainers, UnbindOutcome,
};
pub use service::{DeleteRequest, FallbackChain, NameMapping, NameService};
pub use sweep::SweepJob;
