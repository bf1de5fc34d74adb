//! flowhost コア
//!
//! インスタンスのライフサイクル管理で共有する部品:
//!
//! - `model`: インスタンス、クォータ、リソースサンプル
//! - `naming`: コンテナ識別子と単語ペアのサブドメイン導出
//! - `outcome`: 主結果とベストエフォートの副作用
//! - `store`: インスタンスレコードの永続化 (メモリ / JSON ファイル)
//! - `quota`: オーナーのクォータ取得
//! - `tasks`: 遅延実行用の上限付きバックグラウンドタスクプール

pub mod error;
pub mod model;
pub mod naming;
pub mod outcome;
pub mod quota;
pub mod store;
pub mod tasks;

pub use error::{ErrorKind, Result, StoreError};
pub use model::*;
pub use outcome::{Outcome, SideEffect, SideEffectKind};
pub use quota::{PlanQuotas, QuotaProvider};
pub use store::{FileInstanceStore, InstanceStore, MemoryInstanceStore};
pub use tasks::{TaskPool, TaskReport};
