//! 行为策略实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::enums::ActionType;

/// 商户 × 行为类型的审批策略
///
/// 由运营人员维护，对引擎只读。上限类字段为空表示不限制。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ActionPolicy {
    #[validate(length(min = 1, max = 64, message = "商户ID不能为空且不超过64字符"))]
    pub business_id: String,
    pub action_type: ActionType,
    pub enabled: bool,
    pub auto_approve: bool,
    /// 滚动 24 小时内允许通过的次数
    #[serde(default)]
    #[validate(range(min = 0, message = "每日上限不能为负数"))]
    pub max_per_day: Option<i32>,
    /// 单次请求携带数量（积分或金额）的上限
    #[serde(default)]
    #[validate(range(min = 0, message = "单次上限不能为负数"))]
    pub max_amount: Option<i64>,
    #[serde(default)]
    #[validate(range(min = 0, message = "冷却时间不能为负数"))]
    pub cooldown_minutes: Option<i32>,
    #[serde(default)]
    pub requires_evidence: bool,
    #[serde(default)]
    pub requires_staff_review: bool,
    /// 负载未指定积分时的默认奖励（签到、消费返积分）
    #[serde(default)]
    #[validate(range(min = 0, max = 100_000_000, message = "默认积分需在0到100000000之间"))]
    pub points_award: i64,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl ActionPolicy {
    /// 未配置策略时使用的保守策略：允许提交，但一律人工审核
    pub fn conservative(business_id: &str, action_type: ActionType) -> Self {
        Self {
            business_id: business_id.to_string(),
            action_type,
            enabled: true,
            auto_approve: false,
            max_per_day: None,
            max_amount: None,
            cooldown_minutes: None,
            requires_evidence: false,
            requires_staff_review: true,
            points_award: 0,
            updated_at: Utc::now(),
        }
    }
}
