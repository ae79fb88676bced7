//! 自动化定义实体
//!
//! 自动化 = 触发事件 + 条件（全部满足）+ 有序动作列表，绑定到单个通行证模板。

use chrono::{DateTime, Utc};
use member_shared::events::EventType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

use super::enums::{AutomationStatus, FieldOperation};
use super::ledger::MAX_POINTS_PER_ENTRY;

// ==================== 条件 ====================

/// 条件操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
    In,
    NotIn,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
    Before,
    After,
    IsEmpty,
    IsNotEmpty,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Between => "between",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Contains => "contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::Regex => "regex",
            Self::Before => "before",
            Self::After => "after",
            Self::IsEmpty => "is_empty",
            Self::IsNotEmpty => "is_not_empty",
        };
        f.write_str(s)
    }
}

/// 单个条件，`field` 为评估上下文中的点分路径
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

// ==================== 动作 ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AddPointsConfig {
    /// 负数表示扣减
    pub points: i64,
    #[serde(default)]
    #[validate(length(max = 200, message = "原因不超过200字符"))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CustomFieldConfig {
    #[validate(length(min = 1, max = 100, message = "字段键不能为空且不超过100字符"))]
    pub field_key: String,
    pub value: Value,
    #[serde(default)]
    pub operation: FieldOperation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct PushNotificationConfig {
    /// 模板中承载推送文案的字段
    #[validate(length(min = 1, max = 100, message = "字段键不能为空且不超过100字符"))]
    pub field_key: String,
    /// 支持 `{{变量}}` 占位符
    #[validate(length(min = 1, max = 1000, message = "推送文案不能为空且不超过1000字符"))]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct EmailConfig {
    #[validate(length(min = 1, max = 200, message = "邮件主题不能为空且不超过200字符"))]
    pub subject: String,
    #[validate(length(min = 1, max = 100, message = "邮件模板不能为空且不超过100字符"))]
    pub template: String,
    #[serde(default)]
    pub vars: Map<String, Value>,
}

/// 自动化动作
///
/// 线上格式为 `{"type": "add_points", "config": {...}}`，列表顺序即执行顺序
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum AutomationAction {
    AddPoints(AddPointsConfig),
    UpdateCustomField(CustomFieldConfig),
    SendPushNotification(PushNotificationConfig),
    SendEmail(EmailConfig),
}

impl AutomationAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AddPoints(_) => "add_points",
            Self::UpdateCustomField(_) => "update_custom_field",
            Self::SendPushNotification(_) => "send_push_notification",
            Self::SendEmail(_) => "send_email",
        }
    }

    /// 保存时校验动作配置
    pub fn validate_config(&self) -> Result<(), String> {
        let result = match self {
            Self::AddPoints(c) => {
                if c.points == 0 {
                    return Err("add_points: 积分变动不能为0".to_string());
                }
                if c.points.unsigned_abs() > MAX_POINTS_PER_ENTRY.unsigned_abs() {
                    return Err(format!(
                        "add_points: 积分变动绝对值不能超过{MAX_POINTS_PER_ENTRY}"
                    ));
                }
                c.validate()
            }
            Self::UpdateCustomField(c) => {
                if c.operation == FieldOperation::Increment && !c.value.is_number() {
                    return Err("increment 操作的值必须为数字".to_string());
                }
                c.validate()
            }
            Self::SendPushNotification(c) => c.validate(),
            Self::SendEmail(c) => c.validate(),
        };
        result.map_err(|e| format!("{}: {e}", self.kind()))
    }
}

// ==================== 自动化 ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Automation {
    pub id: Uuid,
    pub business_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: AutomationStatus,
    pub trigger_type: EventType,
    pub trigger_config: Value,
    pub conditions: Vec<Condition>,
    pub actions: Vec<AutomationAction>,
    pub template_id: String,
    pub total_enrolled: i64,
    pub active_enrolled: i64,
    pub total_executions: i64,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Automation {
    /// 是否响应该事件：已发布、触发类型一致、模板一致
    pub fn accepts(&self, event_type: EventType, template_id: &str) -> bool {
        self.status == AutomationStatus::Published
            && self.trigger_type == event_type
            && self.template_id == template_id
    }
}

/// 自动化定义中可编辑的部分
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationDraft {
    pub business_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub trigger_type: EventType,
    #[serde(default)]
    pub trigger_config: Value,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<AutomationAction>,
    pub template_id: String,
    /// 创建时的初始状态，仅允许 draft 或 published
    #[serde(default)]
    pub status: Option<AutomationStatus>,
}
