//! 会员行为请求实体
//!
//! 每种行为类型的负载都是独立的强类型结构，提交时即完成校验，
//! 非法负载不会落库。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use super::enums::{ActionType, DecisionReason, RequestStatus};

// ==================== 负载定义 ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CheckInPayload {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    #[validate(url(message = "凭证地址必须是有效的URL"))]
    pub evidence_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EarnPointsPayload {
    #[validate(range(min = 1, max = 100_000_000, message = "积分数量需在1到100000000之间"))]
    pub points: i64,
    #[serde(default)]
    #[validate(length(max = 500, message = "原因不超过500字符"))]
    pub reason: Option<String>,
    #[serde(default)]
    #[validate(url(message = "凭证地址必须是有效的URL"))]
    pub evidence_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RedeemOfferPayload {
    #[validate(length(min = 1, max = 100, message = "优惠ID不能为空且不超过100字符"))]
    pub offer_id: String,
    /// 兑换消耗的积分，为空表示免费优惠
    #[serde(default)]
    #[validate(range(min = 1, max = 100_000_000, message = "兑换积分需在1到100000000之间"))]
    pub points_cost: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SpendValuePayload {
    /// 消费金额（最小货币单位）
    #[validate(range(min = 1, message = "消费金额必须大于0"))]
    pub amount: i64,
    #[serde(default)]
    #[validate(range(min = 1, max = 100_000_000, message = "积分数量需在1到100000000之间"))]
    pub points: Option<i64>,
    #[serde(default)]
    #[validate(url(message = "凭证地址必须是有效的URL"))]
    pub evidence_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct TicketUsePayload {
    #[validate(length(min = 1, max = 100, message = "票券ID不能为空且不超过100字符"))]
    pub ticket_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ReceiptCreditPayload {
    #[validate(length(min = 1, max = 100, message = "小票ID不能为空且不超过100字符"))]
    pub receipt_id: String,
    #[validate(range(min = 1, message = "小票金额必须大于0"))]
    pub amount: i64,
    #[serde(default)]
    #[validate(range(min = 1, max = 100_000_000, message = "积分数量需在1到100000000之间"))]
    pub points: Option<i64>,
    #[serde(default)]
    #[validate(url(message = "凭证地址必须是有效的URL"))]
    pub evidence_url: Option<String>,
}

/// 按行为类型区分的请求负载
///
/// 线上格式不带标签，类型由请求的 `type` 字段决定
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActionPayload {
    CheckIn(CheckInPayload),
    EarnPoints(EarnPointsPayload),
    RedeemOffer(RedeemOfferPayload),
    SpendValue(SpendValuePayload),
    TicketUse(TicketUsePayload),
    ReceiptCredit(ReceiptCreditPayload),
}

impl ActionPayload {
    /// 按行为类型解析并校验负载
    pub fn parse(action_type: ActionType, raw: &Value) -> Result<Self, String> {
        // 签到允许不带负载
        let raw = match raw {
            Value::Null => &Value::Object(Default::default()),
            other => other,
        };

        fn typed<T>(raw: &Value) -> Result<T, String>
        where
            T: serde::de::DeserializeOwned + Validate,
        {
            let payload: T =
                serde_json::from_value(raw.clone()).map_err(|e| format!("负载格式错误: {e}"))?;
            payload.validate().map_err(|e| e.to_string())?;
            Ok(payload)
        }

        Ok(match action_type {
            ActionType::CheckIn => Self::CheckIn(typed(raw)?),
            ActionType::EarnPoints => Self::EarnPoints(typed(raw)?),
            ActionType::RedeemOffer => Self::RedeemOffer(typed(raw)?),
            ActionType::SpendValue => Self::SpendValue(typed(raw)?),
            ActionType::TicketUse => Self::TicketUse(typed(raw)?),
            ActionType::ReceiptCredit => Self::ReceiptCredit(typed(raw)?),
        })
    }

    pub fn action_type(&self) -> ActionType {
        match self {
            Self::CheckIn(_) => ActionType::CheckIn,
            Self::EarnPoints(_) => ActionType::EarnPoints,
            Self::RedeemOffer(_) => ActionType::RedeemOffer,
            Self::SpendValue(_) => ActionType::SpendValue,
            Self::TicketUse(_) => ActionType::TicketUse,
            Self::ReceiptCredit(_) => ActionType::ReceiptCredit,
        }
    }

    /// 与策略 `max_amount` 比较的数量，不携带数量的类型返回 None
    pub fn quantity(&self) -> Option<i64> {
        match self {
            Self::EarnPoints(p) => Some(p.points),
            Self::RedeemOffer(p) => p.points_cost,
            Self::SpendValue(p) => Some(p.amount),
            Self::ReceiptCredit(p) => Some(p.amount),
            Self::CheckIn(_) | Self::TicketUse(_) => None,
        }
    }

    pub fn evidence_url(&self) -> Option<&str> {
        match self {
            Self::CheckIn(p) => p.evidence_url.as_deref(),
            Self::EarnPoints(p) => p.evidence_url.as_deref(),
            Self::SpendValue(p) => p.evidence_url.as_deref(),
            Self::ReceiptCredit(p) => p.evidence_url.as_deref(),
            Self::RedeemOffer(_) | Self::TicketUse(_) => None,
        }
    }

    /// 通过后对账本的影响
    ///
    /// `default_award` 为策略配置的默认积分，负载自带积分时优先使用负载中的值。
    /// 返回 None 或 0 表示该请求不产生账本变动。
    pub fn ledger_delta(&self, default_award: i64) -> Option<i64> {
        let delta = match self {
            Self::CheckIn(_) => default_award,
            Self::EarnPoints(p) => p.points,
            Self::RedeemOffer(p) => -p.points_cost.unwrap_or(0),
            Self::SpendValue(p) => p.points.unwrap_or(default_award),
            Self::ReceiptCredit(p) => p.points.unwrap_or(default_award),
            Self::TicketUse(_) => 0,
        };
        (delta != 0).then_some(delta)
    }

    /// 扣减型请求需要的余额
    pub fn required_balance(&self) -> Option<i64> {
        match self {
            Self::RedeemOffer(p) => p.points_cost,
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ==================== 请求实体 ====================

/// 会员行为请求
///
/// `(business_id, idempotency_key)` 唯一，重复提交返回首次的结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberActionRequest {
    pub id: Uuid,
    pub business_id: String,
    pub program_id: String,
    pub customer_id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub payload: ActionPayload,
    pub idempotency_key: String,
    pub status: RequestStatus,
    pub decision_reason: Option<DecisionReason>,
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
}

impl MemberActionRequest {
    pub fn new_pending(submission: &NewActionRequest, payload: ActionPayload) -> Self {
        Self {
            id: Uuid::now_v7(),
            business_id: submission.business_id.clone(),
            program_id: submission.program_id.clone(),
            customer_id: submission.customer_id.clone(),
            action_type: payload.action_type(),
            payload,
            idempotency_key: submission.idempotency_key.clone(),
            status: RequestStatus::Pending,
            decision_reason: None,
            review_note: None,
            created_at: Utc::now(),
            decided_at: None,
            decided_by: None,
        }
    }

    /// 账本流水的来源引用，保证同一请求只入账一次
    pub fn ledger_source_ref(&self) -> String {
        format!("request:{}", self.id)
    }

    pub fn outcome(&self) -> SubmitOutcome {
        SubmitOutcome {
            request_id: self.id,
            status: self.status,
            message: self.status.submitter_message().to_string(),
        }
    }
}

/// 提交入参
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewActionRequest {
    #[validate(length(min = 1, max = 64, message = "商户ID不能为空且不超过64字符"))]
    pub business_id: String,
    #[validate(length(min = 1, max = 64, message = "会员计划ID不能为空且不超过64字符"))]
    pub program_id: String,
    #[validate(length(min = 1, max = 64, message = "会员ID不能为空且不超过64字符"))]
    pub customer_id: String,
    #[serde(rename = "type")]
    #[validate(length(min = 1, message = "行为类型不能为空"))]
    pub action_type: String,
    #[serde(default)]
    pub payload: Value,
    #[validate(length(min = 1, max = 128, message = "幂等键不能为空且不超过128字符"))]
    pub idempotency_key: String,
}

/// 提交结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub request_id: Uuid,
    pub status: RequestStatus,
    pub message: String,
}
