//! 领域事件模型
//!
//! 通行证生命周期服务产生的事件统一包装在 `DomainEvent` 信封中，
//! 自动化执行引擎按事件类型匹配触发器、按模板匹配作用范围。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// EventType: 事件类型枚举
// ---------------------------------------------------------------------------

/// 事件类型，线上格式为点分小写（如 `pass.created`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "pass.created")]
    PassCreated,
    #[serde(rename = "pass.downloaded")]
    PassDownloaded,
    #[serde(rename = "registration.created")]
    RegistrationCreated,
    #[serde(rename = "scan.performed")]
    ScanPerformed,
    #[serde(rename = "custom_field_updated")]
    CustomFieldUpdated,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        Self::PassCreated,
        Self::PassDownloaded,
        Self::RegistrationCreated,
        Self::ScanPerformed,
        Self::CustomFieldUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PassCreated => "pass.created",
            Self::PassDownloaded => "pass.downloaded",
            Self::RegistrationCreated => "registration.created",
            Self::ScanPerformed => "scan.performed",
            Self::CustomFieldUpdated => "custom_field_updated",
        }
    }

    /// 新发放的通行证代表一次新的注册（enrollment）
    pub fn is_enrollment(&self) -> bool {
        matches!(self, Self::PassCreated)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("未知事件类型: {s}"))
    }
}

// ---------------------------------------------------------------------------
// DomainEvent: 事件信封
// ---------------------------------------------------------------------------

/// 事件信封
///
/// `event_id` 是执行去重的依据：同一事件重复投递时，已执行过的自动化不会再次执行。
/// 上游未提供时生成 UUID v7。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    #[serde(default = "generate_event_id")]
    pub event_id: String,
    pub event_type: EventType,
    pub business_id: String,
    pub template_id: String,
    pub customer_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

fn generate_event_id() -> String {
    Uuid::now_v7().to_string()
}

impl DomainEvent {
    pub fn new(
        event_type: EventType,
        business_id: impl Into<String>,
        template_id: impl Into<String>,
        customer_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: generate_event_id(),
            event_type,
            business_id: business_id.into(),
            template_id: template_id.into(),
            customer_id: customer_id.into(),
            payload,
            occurred_at: Utc::now(),
        }
    }

    /// 构建条件评估上下文
    ///
    /// 信封元数据与 payload 字段合并到顶层，payload 同时保留在 `payload` 键下，
    /// 条件既可以写 `points` 也可以写 `payload.points`。元数据优先，
    /// payload 中的同名字段不会覆盖它们。
    pub fn to_evaluation_context(&self) -> serde_json::Value {
        let mut context = serde_json::json!({
            "event_id": self.event_id,
            "event_type": self.event_type.as_str(),
            "business_id": self.business_id,
            "template_id": self.template_id,
            "customer_id": self.customer_id,
            "occurred_at": self.occurred_at.to_rfc3339(),
            "payload": self.payload,
        });

        if let serde_json::Value::Object(data_map) = &self.payload
            && let serde_json::Value::Object(ref mut ctx_map) = context
        {
            for (key, value) in data_map {
                ctx_map.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        context
    }

    /// 通知投递所用的通行证标识：`pass_id`，其次 `serial_number`，最后回退到 customer_id
    pub fn pass_identifier(&self) -> String {
        ["pass_id", "serial_number"]
            .iter()
            .find_map(|key| self.payload.get(*key).and_then(|v| v.as_str()))
            .unwrap_or(&self.customer_id)
            .to_string()
    }

    /// 事件负载中携带的邮箱地址
    pub fn email(&self) -> Option<&str> {
        self.payload
            .get("email")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_wire_format() {
        let raw = serde_json::to_string(&EventType::CustomFieldUpdated).unwrap();
        assert_eq!(raw, "\"custom_field_updated\"");

        let parsed: EventType = serde_json::from_str("\"scan.performed\"").unwrap();
        assert_eq!(parsed, EventType::ScanPerformed);
        assert_eq!("pass.created".parse::<EventType>().unwrap(), EventType::PassCreated);
        assert!("pass.deleted".parse::<EventType>().is_err());
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let event: DomainEvent = serde_json::from_value(json!({
            "eventType": "pass.created",
            "businessId": "biz-1",
            "templateId": "tpl-1",
            "customerId": "cust-1"
        }))
        .unwrap();

        assert!(!event.event_id.is_empty());
        assert_eq!(event.payload, serde_json::Value::Null);
        assert!(event.event_type.is_enrollment());
    }

    #[test]
    fn test_evaluation_context_merges_payload() {
        let event = DomainEvent::new(
            EventType::ScanPerformed,
            "biz-1",
            "tpl-1",
            "cust-1",
            json!({"location": "store-9", "customer_id": "spoofed"}),
        );
        let ctx = event.to_evaluation_context();

        assert_eq!(ctx["event_type"], "scan.performed");
        assert_eq!(ctx["location"], "store-9");
        assert_eq!(ctx["payload"]["location"], "store-9");
        assert_eq!(ctx["customer_id"], "cust-1");
    }

    #[test]
    fn test_pass_identifier_fallback() {
        let with_pass = DomainEvent::new(
            EventType::PassDownloaded,
            "b",
            "t",
            "cust-1",
            json!({"pass_id": "pass-77"}),
        );
        assert_eq!(with_pass.pass_identifier(), "pass-77");

        let without = DomainEvent::new(EventType::PassDownloaded, "b", "t", "cust-1", json!({}));
        assert_eq!(without.pass_identifier(), "cust-1");
        assert!(without.email().is_none());
    }
}
