//! 自动化执行记录
//!
//! 执行记录只追加不修改，发布/暂停自动化不会影响历史记录。

use chrono::{DateTime, Utc};
use member_shared::events::EventType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 单次外部调用尝试
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchAttempt {
    pub attempt: u32,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 动作结果，线上格式为 `succeeded` 或 `failed:<原因>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum OutcomeStatus {
    Succeeded,
    Failed(String),
}

impl OutcomeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl From<OutcomeStatus> for String {
    fn from(status: OutcomeStatus) -> Self {
        match status {
            OutcomeStatus::Succeeded => "succeeded".to_string(),
            OutcomeStatus::Failed(reason) => format!("failed:{reason}"),
        }
    }
}

impl TryFrom<String> for OutcomeStatus {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        if raw == "succeeded" {
            return Ok(Self::Succeeded);
        }
        raw.strip_prefix("failed:")
            .map(|reason| Self::Failed(reason.to_string()))
            .ok_or_else(|| format!("无法识别的动作结果: {raw}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    /// 动作在列表中的位置（从 0 开始）
    pub index: usize,
    pub action_type: String,
    pub outcome: OutcomeStatus,
    pub attempts: Vec<DispatchAttempt>,
}

/// 一次自动化执行
///
/// 条件不满足时也会写入记录（`matched = false`，动作列表为空）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub automation_id: Uuid,
    pub business_id: String,
    pub event_id: String,
    pub event_type: EventType,
    pub customer_id: String,
    pub event_context: Value,
    pub matched: bool,
    pub outcomes: Vec<ActionOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn failed_actions(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !o.outcome.is_success())
            .count()
    }
}
