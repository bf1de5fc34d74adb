use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error("設定ファイルの読み込みに失敗しました ({path}): {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("環境変数 {var} の値が不正です: {value}")]
    InvalidEnv { var: String, value: String },

    #[error("不正な期間指定です: {0} (例: 30s, 10m, 6h, 7d)")]
    InvalidDuration(String),

    #[error("設定値が不正です: {0}")]
    Invalid(String),

    #[error("YAML エラー: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
