//! 副次ステップがベストエフォートな操作の結果

use serde::Serialize;

/// ライフサイクル操作に付随する副次ステップ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffectKind {
    DnsBind,
    DnsUnbind,
    VolumeCleanup,
    ContainerStop,
}

impl std::fmt::Display for SideEffectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SideEffectKind::DnsBind => write!(f, "dns_bind"),
            SideEffectKind::DnsUnbind => write!(f, "dns_unbind"),
            SideEffectKind::VolumeCleanup => write!(f, "volume_cleanup"),
            SideEffectKind::ContainerStop => write!(f, "container_stop"),
        }
    }
}

/// 副作用 1 件の結果。`Err` は原因の文字列
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SideEffect {
    pub kind: SideEffectKind,
    pub result: Result<String, String>,
}

impl SideEffect {
    pub fn ok(kind: SideEffectKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            result: Ok(detail.into()),
        }
    }

    pub fn failed(kind: SideEffectKind, error: impl std::fmt::Display) -> Self {
        Self {
            kind,
            result: Err(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// 主な値と、その過程で実行した副作用
///
/// `Outcome` が返った時点で主操作は成功している。
/// 副作用の失敗が操作のエラーになることはない
#[derive(Debug, Clone, Serialize)]
pub struct Outcome<T> {
    pub primary: T,
    pub side_effects: Vec<SideEffect>,
}

impl<T> Outcome<T> {
    pub fn new(primary: T) -> Self {
        Self {
            primary,
            side_effects: Vec::new(),
        }
    }

    pub fn push(&mut self, effect: SideEffect) {
        if let Err(e) = &effect.result {
            tracing::warn!(side_effect = %effect.kind, error = %e, "side effect failed");
        }
        self.side_effects.push(effect);
    }

    pub fn side_effect(&self, kind: SideEffectKind) -> Option<&SideEffect> {
        self.side_effects.iter().find(|e| e.kind == kind)
    }

    pub fn all_side_effects_ok(&self) -> bool {
        self.side_effects.iter().all(SideEffect::is_ok)
    }

    pub fn into_primary(self) -> T {
        self.primary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_tracks_side_effects() {
        let mut outcome = Outcome::new(42);
        outcome.push(SideEffect::ok(SideEffectKind::DnsBind, "created"));
        assert!(outcome.all_side_effects_ok());

        outcome.push(SideEffect::failed(SideEffectKind::DnsUnbind, "timeout"));
        assert!(!outcome.all_side_effects_ok());
        assert_eq!(
            outcome.side_effect(SideEffectKind::DnsUnbind).unwrap().result,
            Err("timeout".to_string())
        );
        assert_eq!(outcome.into_primary(), 42);
    }
}
