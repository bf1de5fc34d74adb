use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// インスタンスのある時点のリソース計測値
///
/// `network_in`/`network_out` は同じインスタンスの前回サンプルからの
/// 転送バイト数で、コンテナ起動からの累計ではない
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub instance_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub memory_percent: f64,
    pub network_in: u64,
    pub network_out: u64,
}

impl ResourceSample {
    /// `usage / limit * 100`。上限が不明なら 0
    pub fn memory_percent_of(usage: u64, limit: u64) -> f64 {
        if limit > 0 {
            usage as f64 / limit as f64 * 100.0
        } else {
            0.0
        }
    }
}
