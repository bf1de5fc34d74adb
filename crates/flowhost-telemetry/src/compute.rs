//! 統計スナップショット → 正規化したメトリクス
//!
//! スナップショットには現在と前回の CPU カウンタが含まれるので、
//! CPU は 1 回の読み取りで計算できる。ネットワークカウンタは累計値で、
//! コレクタがポーリングごとの差分に変換する。

use serde::{Deserialize, Serialize};

/// 少しでも処理したコンテナに報告する CPU 値の下限
pub const CPU_FLOOR: f64 = 0.01;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuCounters {
    /// コンテナの累計 CPU 時間 (ns)
    pub total_usage: u64,
    /// ホストの累計 CPU 時間 (ns)
    pub system_usage: Option<u64>,
    pub online_cpus: Option<u32>,
    pub percpu_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// ランタイムの stats エンドポイントの 1 回分の読み取り
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub cpu: CpuCounters,
    pub precpu: CpuCounters,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub networks: Vec<InterfaceCounters>,
}

impl StatsSnapshot {
    /// オンライン CPU 数。なければ per-CPU の要素数、それもなければ 1
    pub fn cpu_count(&self) -> u32 {
        match self.cpu.online_cpus {
            Some(n) if n > 0 => n,
            _ if self.cpu.percpu_count > 0 => self.cpu.percpu_count as u32,
            _ => 1,
        }
    }

    pub fn cpu_percent(&self) -> f64 {
        let cpu_delta = self.cpu.total_usage.saturating_sub(self.precpu.total_usage);
        let system_delta = match (self.cpu.system_usage, self.precpu.system_usage) {
            (Some(cur), Some(pre)) => cur.saturating_sub(pre),
            // 差分を取る前回値がない
            _ => 0,
        };

        if cpu_delta == 0 || system_delta == 0 {
            return 0.0;
        }

        let percent =
            (cpu_delta as f64 / system_delta as f64) * self.cpu_count() as f64 * 100.0;
        let percent = percent.clamp(0.0, 100.0);
        if percent > 0.0 && percent < CPU_FLOOR {
            CPU_FLOOR
        } else {
            percent
        }
    }

    /// 全インターフェースの (rx, tx) の合計
    pub fn network_totals(&self) -> (u64, u64) {
        self.networks.iter().fold((0, 0), |(rx, tx), n| {
            (rx.saturating_add(n.rx_bytes), tx.saturating_add(n.tx_bytes))
        })
    }
}

/// 前回のポーリングからの転送バイト数。
///
/// 基準値がまだなければ 0。カウンタが戻った場合 (コンテナ再起動) は
/// 現在値を返す。
pub fn counter_delta(previous: Option<u64>, current: u64) -> u64 {
    match previous {
        None => 0,
        Some(prev) if current >= prev => current - prev,
        Some(_) => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(cpu: (u64, u64), system: (u64, u64), online: Option<u32>) -> StatsSnapshot {
        StatsSnapshot {
            cpu: CpuCounters {
                total_usage: cpu.1,
                system_usage: Some(system.1),
                online_cpus: online,
                percpu_count: 0,
            },
            precpu: CpuCounters {
                total_usage: cpu.0,
                system_usage: Some(system.0),
                online_cpus: online,
                percpu_count: 0,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_cpu_floor() {
        // 1 / 1e9 * 4 * 100 = 4e-7
        let s = snapshot((0, 1), (0, 1_000_000_000), Some(4));
        assert_eq!(s.cpu_percent(), CPU_FLOOR);
    }

    #[test]
    fn test_cpu_ten_seconds_apart() {
        // 2 CPU、ホスト時間 10 秒のうちコンテナ時間 0.5 秒
        let s = snapshot(
            (1_000_000_000, 1_500_000_000),
            (100_000_000_000, 110_000_000_000),
            Some(2),
        );
        assert!((s.cpu_percent() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_cpu_clamped_and_zero_cases() {
        let s = snapshot((0, 10_000), (0, 1_000), Some(4));
        assert_eq!(s.cpu_percent(), 100.0);

        let idle = snapshot((5, 5), (0, 1_000), Some(4));
        assert_eq!(idle.cpu_percent(), 0.0);

        let no_system = snapshot((0, 5), (1_000, 1_000), Some(4));
        assert_eq!(no_system.cpu_percent(), 0.0);
    }

    #[test]
    fn test_cpu_without_previous_system_counter() {
        // 起動直後の読み取り: ホストの累計時間は差分ではない
        let mut s = snapshot((0, 2_000_000), (0, 50_000_000), Some(2));
        s.precpu.system_usage = None;
        assert_eq!(s.cpu_percent(), 0.0);

        s.cpu.system_usage = None;
        assert_eq!(s.cpu_percent(), 0.0);
    }

    #[test]
    fn test_cpu_count_fallbacks() {
        let mut s = StatsSnapshot::default();
        assert_eq!(s.cpu_count(), 1);
        s.cpu.percpu_count = 8;
        assert_eq!(s.cpu_count(), 8);
        s.cpu.online_cpus = Some(2);
        assert_eq!(s.cpu_count(), 2);
    }

    #[test]
    fn test_network_totals() {
        let s = StatsSnapshot {
            networks: vec![
                InterfaceCounters {
                    rx_bytes: 100,
                    tx_bytes: 10,
                },
                InterfaceCounters {
                    rx_bytes: 50,
                    tx_bytes: 5,
                },
            ],
            ..Default::default()
        };
        assert_eq!(s.network_totals(), (150, 15));
    }

    #[test]
    fn test_counter_delta() {
        assert_eq!(counter_delta(None, 500), 0);
        assert_eq!(counter_delta(Some(200), 500), 300);
        assert_eq!(counter_delta(Some(900), 40), 40);
    }
}
