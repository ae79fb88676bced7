//! 判定规则
//!
//! 检查顺序：策略开关 → 人工审核 → 凭证 → 每日上限 → 冷却 → 单次上限 → 余额 → 自动通过。
//! 除策略关闭外，任何一项不满足都进入 pending 并记录原因，请求不会被丢弃。

use chrono::{DateTime, Duration, Utc};

use crate::models::{ActionPayload, ActionPolicy, DecisionReason, RequestStatus};

/// 判定时刻的用量快照，必须在用量锁内采集
#[derive(Debug, Clone, Default)]
pub struct UsageSnapshot {
    /// 滚动 24 小时内已通过的同类请求数
    pub approved_last_24h: i64,
    /// 最近一次同类请求（不含本次）的提交时间
    pub last_request_at: Option<DateTime<Utc>>,
    /// 当前积分余额，仅扣减型请求需要
    pub balance: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    AutoApprove,
    Pending(DecisionReason),
    Reject(DecisionReason),
}

impl Decision {
    pub fn status(&self) -> RequestStatus {
        match self {
            Self::AutoApprove => RequestStatus::AutoApproved,
            Self::Pending(_) => RequestStatus::Pending,
            Self::Reject(_) => RequestStatus::Rejected,
        }
    }

    pub fn reason(&self) -> Option<DecisionReason> {
        match self {
            Self::AutoApprove => None,
            Self::Pending(reason) | Self::Reject(reason) => Some(*reason),
        }
    }
}

pub fn decide(
    payload: &ActionPayload,
    policy: &ActionPolicy,
    usage: &UsageSnapshot,
    now: DateTime<Utc>,
) -> Decision {
    if !policy.enabled {
        return Decision::Reject(DecisionReason::PolicyDisabled);
    }

    if policy.requires_staff_review {
        return Decision::Pending(DecisionReason::StaffReviewRequired);
    }

    if policy.requires_evidence && payload.evidence_url().is_none() {
        return Decision::Pending(DecisionReason::EvidenceRequired);
    }

    if let Some(max_per_day) = policy.max_per_day
        && usage.approved_last_24h >= i64::from(max_per_day)
    {
        return Decision::Pending(DecisionReason::DailyCapReached);
    }

    if let Some(cooldown) = policy.cooldown_minutes
        && cooldown > 0
        && let Some(last) = usage.last_request_at
        && now - last < Duration::minutes(i64::from(cooldown))
    {
        return Decision::Pending(DecisionReason::CooldownActive);
    }

    if let (Some(max_amount), Some(quantity)) = (policy.max_amount, payload.quantity())
        && quantity > max_amount
    {
        return Decision::Pending(DecisionReason::AmountExceedsLimit);
    }

    if let Some(required) = payload.required_balance()
        && required > usage.balance
    {
        return Decision::Pending(DecisionReason::InsufficientBalance);
    }

    if policy.auto_approve {
        Decision::AutoApprove
    } else {
        Decision::Pending(DecisionReason::ManualApproval)
    }
}
