//! `30s` / `10m` / `6h` / `7d` 形式の期間

use crate::error::{ConfigError, Result};
use std::time::Duration;

/// 期間文字列をパース
///
/// 単位なしの数値は秒として扱う。`ms` も受け付ける。
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);

    let value: u64 = number
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(input.to_string()))?;

    let invalid = || ConfigError::InvalidDuration(input.to_string());
    let secs = |per_unit: u64| value.checked_mul(per_unit).ok_or_else(invalid);

    let duration = match unit {
        "" | "s" => Duration::from_secs(value),
        "ms" => Duration::from_millis(value),
        "m" => Duration::from_secs(secs(60)?),
        "h" => Duration::from_secs(secs(3600)?),
        "d" => Duration::from_secs(secs(86400)?),
        _ => return Err(invalid()),
    };
    Ok(duration)
}

/// 期間を最も大きい割り切れる単位で表記
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 != 0 {
        return format!("{}ms", millis);
    }
    let secs = duration.as_secs();
    if secs != 0 && secs % 86400 == 0 {
        format!("{}d", secs / 86400)
    } else if secs != 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// serde 用: `#[serde(with = "crate::duration::serde_str")]`
pub(crate) mod serde_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
