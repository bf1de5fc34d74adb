//! インスタンスレコードの永続化
//!
//! `MemoryInstanceStore` はテストと単発ツール用。
//! `FileInstanceStore` は root 配下の `.flowhost/instances.json` に
//! 全レコードを保存し、変更のたびに (直前の版をバックアップして)
//! ファイルを書き直す。

use crate::error::{Result, StoreError};
use crate::model::Instance;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// インスタンスレコードのストレージ。呼び出し側が頼るのは行単位の原子性のみ
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn insert(&self, instance: &Instance) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Instance>>;
    async fn update(&self, instance: &Instance) -> Result<()>;
    async fn remove(&self, id: Uuid) -> Result<Option<Instance>>;

    /// `deleted` 以外の全インスタンス
    async fn list_active(&self) -> Result<Vec<Instance>>;

    async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<Instance>> {
        Ok(self
            .list_active()
            .await?
            .into_iter()
            .filter(|i| i.owner_id == owner_id)
            .collect())
    }

    async fn count_active_for_owner(&self, owner_id: Uuid) -> Result<usize> {
        Ok(self.list_by_owner(owner_id).await?.len())
    }
}

#[derive(Default)]
pub struct MemoryInstanceStore {
    instances: RwLock<HashMap<Uuid, Instance>>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn insert(&self, instance: &Instance) -> Result<()> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&instance.id) {
            return Err(StoreError::AlreadyExists(instance.id));
        }
        instances.insert(instance.id, instance.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Instance>> {
        Ok(self.instances.read().await.get(&id).cloned())
    }

    async fn update(&self, instance: &Instance) -> Result<()> {
        let mut instances = self.instances.write().await;
        match instances.get_mut(&instance.id) {
            Some(existing) => {
                *existing = instance.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(instance.id)),
        }
    }

    async fn remove(&self, id: Uuid) -> Result<Option<Instance>> {
        Ok(self.instances.write().await.remove(&id))
    }

    async fn list_active(&self) -> Result<Vec<Instance>> {
        let mut active: Vec<Instance> = self
            .instances
            .read()
            .await
            .values()
            .filter(|i| !i.status.is_deleted())
            .cloned()
            .collect();
        active.sort_by_key(|i| i.created_at);
        Ok(active)
    }
}

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".flowhost";
const STATE_FILE: &str = "instances.json";
const STATE_BACKUP: &str = "instances.json.backup";
const STATE_TEMP: &str = "instances.json.tmp";
const LOCK_FILE: &str = "instances.lock";

/// 状態ファイルのディスク上のレイアウト
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstanceState {
    version: u32,
    updated_at: DateTime<Utc>,
    instances: HashMap<Uuid, Instance>,
}

impl Default for InstanceState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            instances: HashMap::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// JSON ファイルを使うインスタンスストア
///
/// 生存中は排他ロックファイルを保持し、2 つのデーモンが同じ状態ファイルに
/// 書き込まないようにする。1 時間より古いロックは stale として
/// 引き継ぐ。
///
/// 変更は状態のコピーに適用し、そのコピーがディスクに書けた時点で
/// はじめて見えるようになる。
pub struct FileInstanceStore {
    root: PathBuf,
    state: Mutex<InstanceState>,
    holds_lock: bool,
}

impl FileInstanceStore {
    /// `root` 配下のストアを開き (なければ作成し) ロックを取る
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let mut store = Self {
            root: root.as_ref().to_path_buf(),
            state: Mutex::new(InstanceState::default()),
            holds_lock: false,
        };
        store.ensure_state_dir().await?;
        store.acquire_lock().await?;
        store.holds_lock = true;
        let loaded = store.load().await?;
        *store.state.lock().await = loaded;
        Ok(store)
    }

    fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir().join(STATE_BACKUP)
    }

    fn temp_path(&self) -> PathBuf {
        self.state_dir().join(STATE_TEMP)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    async fn acquire_lock(&self) -> Result<()> {
        let lock_path = self.lock_path();

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let lock_info: LockInfo = serde_json::from_str(&content)?;

            let age = Utc::now().signed_duration_since(lock_info.acquired_at);
            if age.num_hours() < 1 && lock_info.pid != std::process::id() {
                return Err(StoreError::LockError(format!(
                    "{} is held by {} (pid {}) since {}",
                    lock_path.display(),
                    lock_info.holder,
                    lock_info.pid,
                    lock_info.acquired_at
                )));
            }

            tracing::warn!("Taking over stale lock from {}", lock_info.holder);
        }

        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        fs::write(&lock_path, serde_json::to_string_pretty(&lock_info)?).await?;
        tracing::debug!("Acquired instance store lock");
        Ok(())
    }

    async fn load(&self) -> Result<InstanceState> {
        let path = self.state_path();
        if !path.exists() {
            tracing::debug!("Instance state not found, starting empty");
            return Ok(InstanceState::default());
        }

        let content = fs::read_to_string(&path).await?;
        let state: InstanceState = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(StoreError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!("Loaded {} instances", state.instances.len());
        Ok(state)
    }

    /// 一時ファイル経由で `state` を書く。直前のファイルはバックアップとして残す。
    /// 状態ファイルを置き換えるのは最後の rename だけ
    async fn save(&self, state: &mut InstanceState) -> Result<()> {
        state.updated_at = Utc::now();

        let path = self.state_path();
        let temp = self.temp_path();
        let content = serde_json::to_string_pretty(state)?;
        fs::write(&temp, content).await?;

        if path.exists() {
            fs::copy(&path, self.backup_path()).await?;
        }
        fs::rename(&temp, &path).await?;
        tracing::debug!("Saved {} instances", state.instances.len());
        Ok(())
    }

    /// コピーに `mutate` を適用し、永続化してから公開する
    async fn commit<T>(
        &self,
        mutate: impl FnOnce(&mut InstanceState) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let value = mutate(&mut next)?;
        self.save(&mut next).await?;
        *state = next;
        Ok(value)
    }
}

impl Drop for FileInstanceStore {
    fn drop(&mut self) {
        let lock_path = self.lock_path();
        if self.holds_lock && lock_path.exists() {
            let _ = std::fs::remove_file(&lock_path);
        }
    }
}

#[async_trait]
impl InstanceStore for FileInstanceStore {
    async fn insert(&self, instance: &Instance) -> Result<()> {
        self.commit(|state| {
            if state.instances.contains_key(&instance.id) {
                return Err(StoreError::AlreadyExists(instance.id));
            }
            state.instances.insert(instance.id, instance.clone());
            Ok(())
        })
        .await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Instance>> {
        Ok(self.state.lock().await.instances.get(&id).cloned())
    }

    async fn update(&self, instance: &Instance) -> Result<()> {
        self.commit(|state| {
            if !state.instances.contains_key(&instance.id) {
                return Err(StoreError::NotFound(instance.id));
            }
            state.instances.insert(instance.id, instance.clone());
            Ok(())
        })
        .await
    }

    async fn remove(&self, id: Uuid) -> Result<Option<Instance>> {
        if self.get(id).await?.is_none() {
            return Ok(None);
        }
        self.commit(|state| Ok(state.instances.remove(&id))).await
    }

    async fn list_active(&self) -> Result<Vec<Instance>> {
        let state = self.state.lock().await;
        let mut active: Vec<Instance> = state
            .instances
            .values()
            .filter(|i| !i.status.is_deleted())
            .cloned()
            .collect();
        active.sort_by_key(|i| i.created_at);
        Ok(active)
    }
}
