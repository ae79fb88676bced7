//! 会员引擎枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use serde::{Deserialize, Serialize};

/// 会员行为类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum ActionType {
    /// 到店签到
    CheckIn,
    /// 申请积分
    EarnPoints,
    /// 兑换优惠，可能扣减积分
    RedeemOffer,
    /// 消费金额返积分
    SpendValue,
    /// 核销票券，无账本影响
    TicketUse,
    /// 凭小票补录积分
    ReceiptCredit,
}

impl ActionType {
    pub const ALL: [ActionType; 6] = [
        Self::CheckIn,
        Self::EarnPoints,
        Self::RedeemOffer,
        Self::SpendValue,
        Self::TicketUse,
        Self::ReceiptCredit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckIn => "check_in",
            Self::EarnPoints => "earn_points",
            Self::RedeemOffer => "redeem_offer",
            Self::SpendValue => "spend_value",
            Self::TicketUse => "ticket_use",
            Self::ReceiptCredit => "receipt_credit",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("不支持的行为类型: {s}"))
    }
}

/// 请求状态
///
/// pending 之外的三种状态都是终态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum RequestStatus {
    /// 待人工审核
    #[default]
    Pending,
    /// 策略自动通过，效果已生效
    AutoApproved,
    /// 人工审核通过，效果已生效
    Approved,
    /// 已拒绝，无任何效果
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AutoApproved => "auto_approved",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// 已通过（自动或人工），计入每日上限
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::AutoApproved | Self::Approved)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// 返回给提交方的描述，只由状态决定，重复提交得到相同文案
    pub fn submitter_message(&self) -> &'static str {
        match self {
            Self::Pending => "已提交，等待审核",
            Self::AutoApproved => "已自动通过",
            Self::Approved => "已审核通过",
            Self::Rejected => "请求未通过",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 判定原因
///
/// 记录请求停留在 pending 或被拒绝的原因，供运营人员审核时参考
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum DecisionReason {
    PolicyDisabled,
    PolicyMissing,
    StaffReviewRequired,
    EvidenceRequired,
    DailyCapReached,
    CooldownActive,
    AmountExceedsLimit,
    InsufficientBalance,
    /// 策略未开启自动通过
    ManualApproval,
    /// 人工审核给出的结论
    StaffDecision,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PolicyDisabled => "policy_disabled",
            Self::PolicyMissing => "policy_missing",
            Self::StaffReviewRequired => "staff_review_required",
            Self::EvidenceRequired => "evidence_required",
            Self::DailyCapReached => "daily_cap_reached",
            Self::CooldownActive => "cooldown_active",
            Self::AmountExceedsLimit => "amount_exceeds_limit",
            Self::InsufficientBalance => "insufficient_balance",
            Self::ManualApproval => "manual_approval",
            Self::StaffDecision => "staff_decision",
        }
    }
}

/// 自动化状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum AutomationStatus {
    /// 草稿 - 编辑中，不响应事件
    #[default]
    Draft,
    /// 已发布 - 响应匹配的事件
    Published,
    /// 已暂停 - 停止响应新事件，已开始的执行照常完成
    Paused,
    /// 已归档 - 软删除终态，执行历史保留
    Archived,
}

impl AutomationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Paused => "paused",
            Self::Archived => "archived",
        }
    }

    /// 合法的状态流转
    pub fn can_transition_to(&self, target: AutomationStatus) -> bool {
        use AutomationStatus::*;
        matches!(
            (self, target),
            (Draft, Published)
                | (Published, Paused)
                | (Paused, Published)
                | (Draft | Published | Paused, Archived)
        )
    }
}

impl std::fmt::Display for AutomationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AutomationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            "paused" => Ok(Self::Paused),
            "archived" => Ok(Self::Archived),
            other => Err(format!("未知自动化状态: {other}")),
        }
    }
}

/// 自定义字段写入方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOperation {
    #[default]
    Set,
    Increment,
}

impl FieldOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Increment => "increment",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_parse() {
        assert_eq!("receipt_credit".parse::<ActionType>().unwrap(), ActionType::ReceiptCredit);
        assert!("teleport".parse::<ActionType>().is_err());
        assert_eq!(
            serde_json::to_string(&ActionType::CheckIn).unwrap(),
            "\"check_in\""
        );
    }

    #[test]
    fn test_request_status_flags() {
        assert!(RequestStatus::AutoApproved.is_approved());
        assert!(RequestStatus::Approved.is_approved());
        assert!(!RequestStatus::Pending.is_approved());
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(RequestStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_automation_transitions() {
        use AutomationStatus::*;
        assert!(Draft.can_transition_to(Published));
        assert!(Published.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Published));
        assert!(Paused.can_transition_to(Archived));
        assert!(!Published.can_transition_to(Draft));
        assert!(!Archived.can_transition_to(Published));
        assert!(!Draft.can_transition_to(Paused));
    }
}
