//! 积分账本服务
//!
//! 会员请求通过和自动化 `add_points` 动作共用此入口。
//! 写冲突（并发入账、串行化失败）按退避策略重试，幂等由来源引用保证。

use std::sync::Arc;
use std::time::Duration;

use member_shared::observability::metrics;
use member_shared::retry::{RetryPolicy, retry_with_policy};
use tracing::{info, instrument, warn};

use crate::error::{EngineError, Result};
use crate::models::{CreditResult, LedgerCredit, PointsLedgerEntry};
use crate::repository::{DEFAULT_STORE_TIMEOUT, LedgerRepositoryTrait, bounded};

pub struct LedgerService {
    repo: Arc<dyn LedgerRepositoryTrait>,
    retry_policy: RetryPolicy,
    store_timeout: Duration,
}

impl LedgerService {
    pub fn new(repo: Arc<dyn LedgerRepositoryTrait>, retry_policy: RetryPolicy) -> Self {
        Self {
            repo,
            retry_policy,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// 单次入账尝试的超时，超时后事务随 future 一起丢弃并回滚
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// 入账
    ///
    /// 同一 `source_ref` 重复入账返回首次的余额，`applied = false`
    #[instrument(
        skip(self, credit),
        fields(customer_id = %credit.customer_id, delta = credit.delta, source_ref = %credit.source_ref)
    )]
    pub async fn credit(&self, credit: LedgerCredit) -> Result<CreditResult> {
        let result = retry_with_policy(
            &self.retry_policy,
            "ledger_credit",
            |e: &EngineError| matches!(e, EngineError::LedgerConflict { .. }),
            || bounded(self.store_timeout, "ledger_credit", self.repo.apply(&credit)),
        )
        .await;

        match &result {
            Ok(r) if r.applied => {
                metrics::record_ledger_credit("applied");
                info!(balance = r.balance, "积分已入账");
            }
            Ok(r) => {
                metrics::record_ledger_credit("duplicate");
                info!(balance = r.balance, "来源已入账，跳过");
            }
            Err(EngineError::StoreTimeout { .. }) => {
                metrics::record_ledger_credit("timeout");
                warn!(timeout_ms = self.store_timeout.as_millis() as u64, "入账超时");
            }
            Err(EngineError::InsufficientBalance { required, available }) => {
                metrics::record_ledger_credit("insufficient_balance");
                warn!(required, available, "积分余额不足");
            }
            Err(e) => {
                metrics::record_ledger_credit("failed");
                warn!(error = %e, "入账失败");
            }
        }

        result
    }

    pub async fn balance(&self, business_id: &str, customer_id: &str) -> Result<i64> {
        bounded(
            self.store_timeout,
            "ledger_balance",
            self.repo.balance(business_id, customer_id),
        )
        .await
    }

    pub async fn history(
        &self,
        business_id: &str,
        customer_id: &str,
        limit: i64,
    ) -> Result<Vec<PointsLedgerEntry>> {
        bounded(
            self.store_timeout,
            "ledger_history",
            self.repo.history(business_id, customer_id, limit),
        )
        .await
    }
}
