//! flowhost-telemetry
//!
//! インスタンスごとのリソーステレメトリ: ランタイムの統計をサンプルにする
//! コレクタ、時間単位ロールアップ付きのサンプルストア、
//! クエリ層、それらを動かすバックグラウンドループ。

pub mod collector;
pub mod compute;
pub mod error;
pub mod query;
pub mod scheduler;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use collector::{StatsSource, TelemetryCollector};
pub use compute::{CpuCounters, InterfaceCounters, StatsSnapshot};
pub use error::{Result, TelemetryError};
pub use query::{
    HistoryPoint, MAX_HISTORY_POINTS, TelemetryQuery, UsageSummary, auto_resolution, parse_period,
};
pub use scheduler::{RollupJob, Scheduler, TickReport};
pub use store::{HourlyRollup, MemorySampleStore, SampleStore};
