//! プロバイダの不具合を注入できるインメモリのネームサービス

use crate::error::{DnsError, Result};
use crate::service::{DeleteRequest, NameMapping, NameService};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// ネームサービスのテストダブル
///
/// `ignore_deletes(n)` で次の `n` 回の削除は何も消さずに成功を返す。
/// 実際のプロバイダもこう振る舞う。
#[derive(Default)]
pub struct FlakyNameService {
    mappings: Mutex<Vec<NameMapping>>,
    calls: Mutex<Vec<String>>,
    ignored_deletes: AtomicUsize,
    ignore_pair_deletes: AtomicBool,
    fail_lists: AtomicBool,
    fail_adds: AtomicBool,
    fail_deletes: AtomicBool,
}

impl FlakyNameService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mappings(mappings: Vec<NameMapping>) -> Self {
        Self {
            mappings: Mutex::new(mappings),
            ..Self::default()
        }
    }

    pub fn ignore_deletes(&self, count: usize) {
        self.ignored_deletes.store(count, Ordering::SeqCst);
    }

    /// answer 付きの削除をすべて黙って無視する
    pub fn ignore_pair_deletes(&self, ignore: bool) {
        self.ignore_pair_deletes.store(ignore, Ordering::SeqCst);
    }

    pub fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    pub fn fail_adds(&self, fail: bool) {
        self.fail_adds.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub async fn insert(&self, mapping: NameMapping) {
        self.mappings.lock().await.push(mapping);
    }

    pub async fn snapshot(&self) -> Vec<NameMapping> {
        self.mappings.lock().await.clone()
    }

    pub async fn contains_label(&self, label: &str) -> bool {
        self.mappings.lock().await.iter().any(|m| m.label == label)
    }

    /// これまでの呼び出し (例: `delete a.internal 10.0.0.1`)
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: String) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl NameService for FlakyNameService {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn list(&self) -> Result<Vec<NameMapping>> {
        self.record("list".to_string()).await;
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(DnsError::CommandFailed("list unavailable".to_string()));
        }
        Ok(self.snapshot().await)
    }

    async fn add(&self, mapping: &NameMapping) -> Result<()> {
        self.record(format!("add {} {}", mapping.label, mapping.answer))
            .await;
        if self.fail_adds.load(Ordering::SeqCst) {
            return Err(DnsError::CommandFailed("add unavailable".to_string()));
        }
        let mut mappings = self.mappings.lock().await;
        if !mappings.contains(mapping) {
            mappings.push(mapping.clone());
        }
        Ok(())
    }

    async fn delete(&self, request: &DeleteRequest) -> Result<()> {
        match &request.answer {
            Some(answer) => self.record(format!("delete {} {}", request.label, answer)).await,
            None => self.record(format!("delete {}", request.label)).await,
        }
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(DnsError::CommandFailed("delete unavailable".to_string()));
        }
        if request.answer.is_some() && self.ignore_pair_deletes.load(Ordering::SeqCst) {
            return Ok(());
        }
        let ignored = self
            .ignored_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if ignored {
            return Ok(());
        }

        let mut mappings = self.mappings.lock().await;
        mappings.retain(|m| {
            m.label != request.label
                || request.answer.as_ref().is_some_and(|answer| &m.answer != answer)
        });
        Ok(())
    }
}
