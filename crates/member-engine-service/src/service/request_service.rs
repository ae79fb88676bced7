//! 会员请求受理服务
//!
//! ## 受理流程
//!
//! 1. 校验入参与负载 -> 2. 获取受理锁 `request:{business_id}:{idempotency_key}`
//!    -> 3. 按幂等键查重 -> 4. 插入 pending -> 5. 审批判定 -> 6. 释放受理锁
//!
//! 并发重试在受理锁上排队，拿到锁时首个请求已完成判定，
//! 所有重试都返回同一个最终结果。

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::approval::ApprovalEngine;
use crate::error::{EngineError, Result};
use crate::lock::LockManager;
use crate::models::{ActionPayload, ActionType, MemberActionRequest, NewActionRequest, SubmitOutcome};
use crate::repository::RequestRepositoryTrait;

const PENDING_PAGE_LIMIT: i64 = 200;

pub struct RequestService {
    repo: Arc<dyn RequestRepositoryTrait>,
    approval: Arc<ApprovalEngine>,
    locks: Arc<LockManager>,
}

impl RequestService {
    pub fn new(
        repo: Arc<dyn RequestRepositoryTrait>,
        approval: Arc<ApprovalEngine>,
        locks: Arc<LockManager>,
    ) -> Self {
        Self {
            repo,
            approval,
            locks,
        }
    }

    /// 提交会员行为请求
    ///
    /// 相同 `(business_id, idempotency_key)` 的重复提交返回首次结果，不是错误
    #[instrument(
        skip(self, submission),
        fields(
            business_id = %submission.business_id,
            customer_id = %submission.customer_id,
            idempotency_key = %submission.idempotency_key
        )
    )]
    pub async fn submit(&self, submission: NewActionRequest) -> Result<SubmitOutcome> {
        submission.validate()?;
        let action_type = submission
            .action_type
            .parse::<ActionType>()
            .map_err(EngineError::Validation)?;
        let payload =
            ActionPayload::parse(action_type, &submission.payload).map_err(EngineError::Validation)?;

        // 同一幂等键的受理与判定串行执行
        let lock_key = format!(
            "request:{}:{}",
            submission.business_id, submission.idempotency_key
        );
        let guard = self.locks.acquire(&lock_key, None).await?;
        let result = self.submit_locked(&submission, payload).await;
        if let Err(e) = guard.release().await {
            warn!(error = %e, "释放受理锁失败");
        }
        result
    }

    async fn submit_locked(
        &self,
        submission: &NewActionRequest,
        payload: ActionPayload,
    ) -> Result<SubmitOutcome> {
        if let Some(existing) = self
            .repo
            .find_by_idempotency_key(&submission.business_id, &submission.idempotency_key)
            .await?
        {
            info!(request_id = %existing.id, status = %existing.status, "重复提交，返回原结果");
            return Ok(existing.outcome());
        }

        let request = MemberActionRequest::new_pending(submission, payload);
        if !self.repo.insert(&request).await? {
            // 唯一约束兜底：其他实例在锁降级期间抢先插入
            let existing = self
                .repo
                .find_by_idempotency_key(&submission.business_id, &submission.idempotency_key)
                .await?
                .ok_or_else(|| EngineError::Internal("幂等键冲突但查询不到原请求".to_string()))?;
            return Ok(existing.outcome());
        }

        info!(request_id = %request.id, action_type = %request.action_type, "请求已受理");
        let decided = self.approval.evaluate(request).await?;
        info!(
            request_id = %decided.id,
            status = %decided.status,
            reason = ?decided.decision_reason,
            "请求判定完成"
        );
        Ok(decided.outcome())
    }

    /// 人工审核 pending 请求
    pub async fn review(
        &self,
        request_id: Uuid,
        approve: bool,
        staff_id: &str,
        note: Option<String>,
    ) -> Result<MemberActionRequest> {
        if staff_id.trim().is_empty() {
            return Err(EngineError::Validation("审核人不能为空".to_string()));
        }
        self.approval.review(request_id, approve, staff_id, note).await
    }

    pub async fn get(&self, request_id: Uuid) -> Result<MemberActionRequest> {
        self.repo
            .get(request_id)
            .await?
            .ok_or_else(|| EngineError::RequestNotFound(request_id.to_string()))
    }

    pub async fn list_pending(&self, business_id: &str) -> Result<Vec<MemberActionRequest>> {
        self.repo.list_pending(business_id, PENDING_PAGE_LIMIT).await
    }
}
