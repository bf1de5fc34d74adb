//! 遅延バックグラウンド処理用の上限付きプール
//!
//! 投入したタスクには相関 ID、任意の開始遅延、タイムアウトが付く。
//! 完了 (または失敗) はその ID 付きでログに出し、プールを drain するまで
//! `TaskReport` として保持する。

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// プール内タスクの最終状態
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub task_id: String,
    pub label: String,
    pub result: Result<(), String>,
}

pub struct TaskPool {
    name: String,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<TaskReport>>,
    finished: Mutex<Vec<TaskReport>>,
    next_id: AtomicU64,
}

impl TaskPool {
    /// 同時実行は最大 `max_concurrent` 件。残りは permit を待つ
    pub fn new(name: impl Into<String>, max_concurrent: usize) -> Self {
        Self {
            name: name.into(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tasks: Mutex::new(JoinSet::new()),
            finished: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// `delay` 後に `timeout` 付きで `work` を実行する。相関 ID を返す
    pub async fn submit<F, E>(
        &self,
        label: impl Into<String>,
        delay: Duration,
        timeout: Duration,
        work: F,
    ) -> String
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let task_id = format!(
            "{}-{}",
            self.name,
            self.next_id.fetch_add(1, Ordering::Relaxed)
        );
        let label = label.into();
        let permits = self.permits.clone();

        let mut tasks = self.tasks.lock().await;
        self.reap(&mut tasks).await;

        let id = task_id.clone();
        tasks.spawn(async move {
            tokio::time::sleep(delay).await;

            let result = match permits.acquire_owned().await {
                Ok(_permit) => match tokio::time::timeout(timeout, work).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("timed out after {:?}", timeout)),
                },
                Err(_) => Err("task pool closed".to_string()),
            };

            match &result {
                Ok(()) => debug!(task_id = %id, %label, "background task finished"),
                Err(e) => warn!(task_id = %id, %label, error = %e, "background task failed"),
            }

            TaskReport {
                task_id: id,
                label,
                result,
            }
        });

        task_id
    }

    /// 終了済みタスクをレポートへ移す
    async fn reap(&self, tasks: &mut JoinSet<TaskReport>) {
        let mut finished = self.finished.lock().await;
        while let Some(joined) = tasks.try_join_next() {
            match joined {
                Ok(report) => finished.push(report),
                Err(e) => warn!(pool = %self.name, error = %e, "background task panicked"),
            }
        }
    }

    /// 投入済みで未回収のタスク数
    pub async fn in_flight(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// 全タスクの完了を待ち、集めたレポートをすべて返す
    pub async fn drain(&self) -> Vec<TaskReport> {
        let mut tasks = self.tasks.lock().await;
        let mut reports = std::mem::take(&mut *self.finished.lock().await);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => warn!(pool = %self.name, error = %e, "background task panicked"),
            }
        }
        reports
    }
}
