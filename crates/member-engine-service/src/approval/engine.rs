//! 审批执行
//!
//! 判定与效果应用在 `usage:{business_id}:{customer_id}:{action_type}` 锁内完成，
//! 同一会员同类请求的并发提交看到一致的用量快照，不会同时越过上限。

use std::sync::Arc;

use chrono::{Duration, Utc};
use member_shared::observability::metrics;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::decision::{Decision, UsageSnapshot, decide};
use crate::error::{EngineError, Result};
use crate::lock::LockManager;
use crate::models::{
    ActionPolicy, CreditResult, DecisionReason, LedgerCredit, MemberActionRequest, RequestStatus,
};
use crate::policy::PolicyResolver;
use crate::repository::{DecisionUpdate, RequestRepositoryTrait};
use crate::service::LedgerService;

const SYSTEM_DECIDER: &str = "system";

pub struct ApprovalEngine {
    requests: Arc<dyn RequestRepositoryTrait>,
    policies: Arc<PolicyResolver>,
    ledger: Arc<LedgerService>,
    locks: Arc<LockManager>,
}

impl ApprovalEngine {
    pub fn new(
        requests: Arc<dyn RequestRepositoryTrait>,
        policies: Arc<PolicyResolver>,
        ledger: Arc<LedgerService>,
        locks: Arc<LockManager>,
    ) -> Self {
        Self {
            requests,
            policies,
            ledger,
            locks,
        }
    }

    fn usage_key(request: &MemberActionRequest) -> String {
        format!(
            "usage:{}:{}:{}",
            request.business_id, request.customer_id, request.action_type
        )
    }

    /// 对新插入的 pending 请求做出判定并落库，返回更新后的请求
    #[instrument(
        skip(self, request),
        fields(request_id = %request.id, business_id = %request.business_id, customer_id = %request.customer_id)
    )]
    pub async fn evaluate(&self, request: MemberActionRequest) -> Result<MemberActionRequest> {
        let Some(policy) = self
            .policies
            .resolve(&request.business_id, request.action_type)
            .await?
        else {
            info!(action_type = %request.action_type, "未配置策略，转人工审核");
            return self
                .persist(request, Decision::Pending(DecisionReason::PolicyMissing))
                .await;
        };

        if !policy.enabled {
            let decision = decide(&request.payload, &policy, &UsageSnapshot::default(), Utc::now());
            return self.persist(request, decision).await;
        }

        let guard = self.locks.acquire(&Self::usage_key(&request), None).await?;
        let result = self.evaluate_locked(request, &policy).await;
        if let Err(e) = guard.release().await {
            warn!(error = %e, "释放用量锁失败");
        }
        result
    }

    async fn evaluate_locked(
        &self,
        request: MemberActionRequest,
        policy: &ActionPolicy,
    ) -> Result<MemberActionRequest> {
        let now = Utc::now();
        let usage = self.snapshot(&request).await?;
        let decision = decide(&request.payload, policy, &usage, now);

        if decision != Decision::AutoApprove {
            info!(reason = ?decision.reason(), "请求进入 {}", decision.status());
            return self.persist(request, decision).await;
        }

        match self.apply_effect(&request, policy).await {
            Ok(credit) => {
                if let Some(credit) = &credit {
                    info!(balance = credit.balance, "自动通过，效果已应用");
                }
                self.persist(request, decision).await
            }
            // 快照之后余额被其他来源扣减
            Err(EngineError::InsufficientBalance { .. }) => {
                self.persist(
                    request,
                    Decision::Pending(DecisionReason::InsufficientBalance),
                )
                .await
            }
            Err(e) => Err(e),
        }
    }

    async fn snapshot(&self, request: &MemberActionRequest) -> Result<UsageSnapshot> {
        let since = Utc::now() - Duration::hours(24);
        let approved_last_24h = self
            .requests
            .count_approved_since(
                &request.business_id,
                &request.customer_id,
                request.action_type,
                since,
            )
            .await?;
        let last_request_at = self
            .requests
            .latest_request_before(
                &request.business_id,
                &request.customer_id,
                request.action_type,
                request.created_at,
                request.id,
            )
            .await?;
        let balance = match request.payload.required_balance() {
            Some(_) => {
                self.ledger
                    .balance(&request.business_id, &request.customer_id)
                    .await?
            }
            None => 0,
        };

        Ok(UsageSnapshot {
            approved_last_24h,
            last_request_at,
            balance,
        })
    }

    /// 应用请求通过后的账本效果，自动通过与人工通过共用
    ///
    /// 来源引用为 `request:{id}`，重复调用不会重复入账
    pub async fn apply_effect(
        &self,
        request: &MemberActionRequest,
        policy: &ActionPolicy,
    ) -> Result<Option<CreditResult>> {
        let Some(delta) = request.payload.ledger_delta(policy.points_award) else {
            return Ok(None);
        };

        let credit = LedgerCredit {
            business_id: request.business_id.clone(),
            customer_id: request.customer_id.clone(),
            delta,
            reason: format!("member_request:{}", request.action_type),
            source_request_id: Some(request.id),
            source_ref: request.ledger_source_ref(),
        };
        self.ledger.credit(credit).await.map(Some)
    }

    /// 人工审核
    ///
    /// 在用量锁内重新读取请求，只有 pending 请求可以被审核
    #[instrument(skip(self, note), fields(request_id = %request_id, staff_id = %staff_id))]
    pub async fn review(
        &self,
        request_id: Uuid,
        approve: bool,
        staff_id: &str,
        note: Option<String>,
    ) -> Result<MemberActionRequest> {
        let request = self
            .requests
            .get(request_id)
            .await?
            .ok_or_else(|| EngineError::RequestNotFound(request_id.to_string()))?;

        let guard = self.locks.acquire(&Self::usage_key(&request), None).await?;
        let result = self.review_locked(request_id, approve, staff_id, note).await;
        if let Err(e) = guard.release().await {
            warn!(error = %e, "释放用量锁失败");
        }
        result
    }

    async fn review_locked(
        &self,
        request_id: Uuid,
        approve: bool,
        staff_id: &str,
        note: Option<String>,
    ) -> Result<MemberActionRequest> {
        let mut request = self
            .requests
            .get(request_id)
            .await?
            .ok_or_else(|| EngineError::RequestNotFound(request_id.to_string()))?;

        let target = if approve {
            RequestStatus::Approved
        } else {
            RequestStatus::Rejected
        };
        if request.status != RequestStatus::Pending {
            return Err(EngineError::InvalidStatusTransition {
                from: request.status.to_string(),
                to: target.to_string(),
            });
        }

        if approve {
            let policy = self
                .policies
                .resolve(&request.business_id, request.action_type)
                .await?
                .unwrap_or_else(|| {
                    ActionPolicy::conservative(&request.business_id, request.action_type)
                });
            self.apply_effect(&request, &policy).await?;
        }

        let update = DecisionUpdate {
            status: target,
            reason: Some(DecisionReason::StaffDecision),
            decided_at: Some(Utc::now()),
            decided_by: Some(staff_id.to_string()),
            review_note: note,
        };
        self.requests.update_decision(request.id, &update).await?;

        request.status = update.status;
        request.decision_reason = update.reason;
        request.decided_at = update.decided_at;
        request.decided_by = update.decided_by;
        request.review_note = update.review_note;

        metrics::record_member_request(request.action_type.as_str(), request.status.as_str());
        info!(status = %request.status, "人工审核完成");
        Ok(request)
    }

    async fn persist(
        &self,
        mut request: MemberActionRequest,
        decision: Decision,
    ) -> Result<MemberActionRequest> {
        let status = decision.status();
        let update = DecisionUpdate {
            status,
            reason: decision.reason(),
            decided_at: status.is_terminal().then(Utc::now),
            decided_by: status.is_terminal().then(|| SYSTEM_DECIDER.to_string()),
            review_note: None,
        };
        self.requests.update_decision(request.id, &update).await?;

        request.status = update.status;
        request.decision_reason = update.reason;
        request.decided_at = update.decided_at;
        request.decided_by = update.decided_by;

        metrics::record_member_request(request.action_type.as_str(), request.status.as_str());
        Ok(request)
    }
}
