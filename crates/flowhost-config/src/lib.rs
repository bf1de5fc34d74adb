pub mod duration;
pub mod error;
pub mod settings;

pub use duration::{format_duration, parse_duration};
pub use error::*;
pub use settings::*;

use std::path::{Path, PathBuf};

/// 設定ファイルパスを直接指定する環境変数
pub const CONFIG_ENV: &str = "FLOWHOST_CONFIG";

/// flowhost の設定ディレクトリを取得
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("flowhost");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// 設定ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 FLOWHOST_CONFIG (直接パス指定)
/// 2. カレントディレクトリ: flowhost.local.yaml, flowhost.yaml
/// 3. ./.flowhost/ ディレクトリ内: 同様の順序
/// 4. ~/.config/flowhost/flowhost.yaml
///
/// 見つからなければ `None` (デフォルト設定で動作する)
pub fn find_config_file() -> Result<Option<PathBuf>> {
    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        tracing::warn!("{} points to a missing file: {}", CONFIG_ENV, path.display());
    }

    let current_dir = std::env::current_dir()?;
    let candidates = ["flowhost.local.yaml", "flowhost.yaml"];

    for filename in &candidates {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    let local_dir = current_dir.join(".flowhost");
    if local_dir.is_dir() {
        for filename in &candidates {
            let path = local_dir.join(filename);
            if path.exists() {
                return Ok(Some(path));
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("flowhost").join("flowhost.yaml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

/// YAML ファイルから設定を読み込む (環境変数の上書きなし)
pub fn load_file(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// 設定ファイル + 環境変数から有効な設定を組み立てる
pub fn load() -> Result<Settings> {
    let mut settings = match find_config_file()? {
        Some(path) => {
            tracing::debug!("Loading config from {}", path.display());
            load_file(&path)?
        }
        None => Settings::default(),
    };
    apply_env_overrides(&mut settings)?;
    settings.validate()?;
    Ok(settings)
}

fn env_value(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

/// デプロイ環境で使われる環境変数で上書き
pub fn apply_env_overrides(settings: &mut Settings) -> Result<()> {
    if let Some(v) = env_value("DOMAIN") {
        settings.server.domain = v;
    }
    if let Some(v) = env_value("LOG_LEVEL") {
        settings.server.log_level = v;
    }
    if let Some(v) = env_value("DOCKER_HOST") {
        settings.docker.host = Some(v);
    }
    if let Some(v) = env_value("DOCKER_NETWORK") {
        settings.docker.network = v;
    }
    if let Some(v) = env_value("N8N_BASE_IMAGE") {
        settings.docker.base_image = v;
    }
    if let Some(v) = env_value("ADGUARD_HOST") {
        settings.dns.api.host = v;
    }
    if let Some(v) = env_value("ADGUARD_PROTOCOL") {
        settings.dns.api.protocol = v;
    }
    if let Some(v) = env_value("ADGUARD_USERNAME") {
        settings.dns.api.username = v;
    }
    if let Some(v) = env_value("ADGUARD_PASSWORD") {
        settings.dns.api.password = v;
    }
    if let Some(v) = env_value("DNS_CLI_PATH") {
        settings.dns.cli_path = Some(PathBuf::from(v));
    }
    if let Some(v) = env_value("RESOURCE_MONITOR_INTERVAL") {
        settings.monitoring.interval =
            parse_duration(&v).map_err(|_| ConfigError::InvalidEnv {
                var: "RESOURCE_MONITOR_INTERVAL".to_string(),
                value: v.clone(),
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use std::time::Duration;

    #[test]
    fn test_get_config_dir() {
        let result = get_config_dir();
        assert!(result.is_ok());

        let config_dir = result.unwrap();
        assert!(config_dir.ends_with("flowhost"));
        assert!(config_dir.exists());
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("flowhost.yaml"), "{}").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = temp_env::with_var_unset(CONFIG_ENV, find_config_file);
        std::env::set_current_dir(original_dir).unwrap();

        assert!(result.unwrap().unwrap().ends_with("flowhost.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_local_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("flowhost.yaml"), "{}").unwrap();
        fs::write(temp_dir.path().join("flowhost.local.yaml"), "{}").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = temp_env::with_var_unset(CONFIG_ENV, find_config_file);
        std::env::set_current_dir(original_dir).unwrap();

        // flowhost.local.yaml が優先される
        assert!(result.unwrap().unwrap().ends_with("flowhost.local.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_local_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        let local_dir = temp_dir.path().join(".flowhost");
        fs::create_dir(&local_dir).unwrap();
        fs::write(local_dir.join("flowhost.yaml"), "{}").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = temp_env::with_var_unset(CONFIG_ENV, find_config_file);
        std::env::set_current_dir(original_dir).unwrap();

        assert!(
            result
                .unwrap()
                .unwrap()
                .ends_with(".flowhost/flowhost.yaml")
        );
    }

    #[test]
    #[serial]
    fn test_find_config_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "{}").unwrap();

        let result = temp_env::with_var(CONFIG_ENV, config_path.to_str(), find_config_file);
        assert_eq!(result.unwrap(), Some(config_path));
    }

    #[test]
    #[serial]
    fn test_load_applies_env_overrides() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("flowhost.yaml");
        fs::write(
            &config_path,
            "server:\n  domain: from-file.dev\ndocker:\n  network: backend\n",
        )
        .unwrap();

        let settings = temp_env::with_vars(
            [
                (CONFIG_ENV, config_path.to_str()),
                ("DOMAIN", Some("from-env.dev")),
                ("RESOURCE_MONITOR_INTERVAL", Some("15s")),
                ("ADGUARD_PROTOCOL", Some("http")),
                ("DOCKER_NETWORK", None),
            ],
            load,
        )
        .unwrap();

        assert_eq!(settings.server.domain, "from-env.dev");
        assert_eq!(settings.docker.network, "backend");
        assert_eq!(settings.monitoring.interval, Duration::from_secs(15));
        assert_eq!(settings.dns.api.protocol, "http");
    }

    #[test]
    #[serial]
    fn test_invalid_env_interval() {
        let result = temp_env::with_vars(
            [
                (CONFIG_ENV, Some("/nonexistent/flowhost.yaml")),
                ("RESOURCE_MONITOR_INTERVAL", Some("soon")),
            ],
            || {
                let mut settings = Settings::default();
                apply_env_overrides(&mut settings)
            },
        );

        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_load_file_parse_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("broken.yaml");
        fs::write(&path, "monitoring:\n  interval: [1, 2]\n").unwrap();

        assert!(matches!(load_file(&path), Err(ConfigError::Parse { .. })));
    }
}
