//! ローカル DNS ツールのラッパー
//!
//! 同じプロバイダに接続するが、HTTP API よりも削除が確実に反映される。
//! コマンド:
//!
//! - `list`: ヘッダ、`-----` 区切り、その後に `domain -> answer` 行
//! - `add -domain D -answer A`
//! - `delete -domain D [-answer A]`

use crate::error::{DnsError, Result};
use crate::service::{DeleteRequest, NameMapping, NameService};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

pub struct DnsCli {
    path: PathBuf,
    timeout: Duration,
}

impl DnsCli {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// ツールのバイナリが存在するか
    pub fn is_available(&self) -> bool {
        self.path.is_file()
    }

    /// ツールのコマンドを実行して stdout を返す
    async fn run_command(&self, args: &[&str]) -> Result<String> {
        if !self.is_available() {
            return Err(DnsError::CliNotFound(self.path.clone()));
        }

        let mut cmd = Command::new(&self.path);
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!("Running: {} {}", self.path.display(), args.join(" "));

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                DnsError::CommandFailed(format!("timed out after {:?}", self.timeout))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DnsError::CommandFailed(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// `list` の出力をパース: 最初の `-----` 行より後ろが対象
pub fn parse_list_output(output: &str) -> Vec<NameMapping> {
    output
        .lines()
        .skip_while(|line| !line.contains("-----"))
        .skip(1)
        .filter_map(|line| {
            let (domain, answer) = line.split_once("->")?;
            let (domain, answer) = (domain.trim(), answer.trim());
            if domain.is_empty() || answer.is_empty() || answer.contains("->") {
                return None;
            }
            Some(NameMapping::new(domain, answer))
        })
        .collect()
}

#[async_trait]
impl NameService for DnsCli {
    fn name(&self) -> &str {
        "cli"
    }

    async fn list(&self) -> Result<Vec<NameMapping>> {
        let output = self.run_command(&["list"]).await?;
        Ok(parse_list_output(&output))
    }

    async fn add(&self, mapping: &NameMapping) -> Result<()> {
        self.run_command(&["add", "-domain", &mapping.label, "-answer", &mapping.answer])
            .await?;
        Ok(())
    }

    async fn delete(&self, request: &DeleteRequest) -> Result<()> {
        match &request.answer {
            Some(answer) => {
                self.run_command(&["delete", "-domain", &request.label, "-answer", answer])
                    .await?
            }
            None => self.run_command(&["delete", "-domain", &request.label]).await?,
        };
        Ok(())
    }
}
