//! オーナーのクォータ取得

use crate::model::{Plan, Quota};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// オーナーごとのリソースクォータの取得元 (ユーザー/プランサービス)
#[async_trait]
pub trait QuotaProvider: Send + Sync {
    async fn quota_for(&self, owner_id: Uuid) -> Quota;
}

/// 静的プラン表からのクォータ。未割り当てのオーナーはデフォルトプラン
pub struct PlanQuotas {
    default_plan: Plan,
    assignments: RwLock<HashMap<Uuid, Plan>>,
}

impl PlanQuotas {
    pub fn new(default_plan: Plan) -> Self {
        Self {
            default_plan,
            assignments: RwLock::new(HashMap::new()),
        }
    }

    pub async fn assign(&self, owner_id: Uuid, plan: Plan) {
        self.assignments.write().await.insert(owner_id, plan);
    }

    pub async fn plan_of(&self, owner_id: Uuid) -> Plan {
        self.assignments
            .read()
            .await
            .get(&owner_id)
            .copied()
            .unwrap_or(self.default_plan)
    }
}

impl Default for PlanQuotas {
    fn default() -> Self {
        Self::new(Plan::Free)
    }
}

#[async_trait]
impl QuotaProvider for PlanQuotas {
    async fn quota_for(&self, owner_id: Uuid) -> Quota {
        self.plan_of(owner_id).await.quota()
    }
}
