//! リソースクォータと静的プラン表

use serde::{Deserialize, Serialize};

/// オーナー 1 人分のリソース上限
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quota {
    pub max_instances: usize,
    pub cpu_cores: f64,
    pub memory_mb: u64,
    pub storage_gb: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    #[default]
    Free,
    Basic,
    Pro,
    Enterprise,
}

impl Plan {
    pub fn quota(&self) -> Quota {
        let (max_instances, cpu_cores, memory_mb, storage_gb) = match self {
            Plan::Free => (1, 0.5, 512, 1),
            Plan::Basic => (3, 1.0, 1024, 5),
            Plan::Pro => (10, 2.0, 2048, 20),
            Plan::Enterprise => (25, 4.0, 4096, 50),
        };
        Quota {
            max_instances,
            cpu_cores,
            memory_mb,
            storage_gb,
        }
    }
}

impl std::str::FromStr for Plan {
    type Err = std::convert::Infallible;

    /// 未知のプラン名は `Free` にフォールバック
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "basic" => Plan::Basic,
            "pro" => Plan::Pro,
            "enterprise" => Plan::Enterprise,
            _ => Plan::Free,
        })
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Plan::Free => write!(f, "free"),
            Plan::Basic => write!(f, "basic"),
            Plan::Pro => write!(f, "pro"),
            Plan::Enterprise => write!(f, "enterprise"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_limits() {
        assert_eq!(Plan::Free.quota().max_instances, 1);
        assert_eq!(Plan::Pro.quota().memory_mb, 2048);
        assert_eq!(Plan::Enterprise.quota().storage_gb, 50);
    }

    #[test]
    fn test_unknown_plan_is_free() {
        assert_eq!("gold".parse::<Plan>().unwrap(), Plan::Free);
        assert_eq!("PRO".parse::<Plan>().unwrap(), Plan::Pro);
    }
}
