//! 投递接口与 HTTP 实现

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::models::FieldOperation;

/// 通知投递接口
///
/// 每次调用只做一次投递尝试，重试与超时由动作执行器控制
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// 更新通行证字段并触发推送
    async fn send_field_update(&self, identifier: &str, field_key: &str, message: &str)
    -> Result<()>;

    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        template: &str,
        vars: &Map<String, Value>,
    ) -> Result<()>;

    async fn set_custom_field(
        &self,
        identifier: &str,
        field_key: &str,
        value: &Value,
        operation: FieldOperation,
    ) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FieldUpdateBody<'a> {
    identifier: &'a str,
    field_key: &'a str,
    message: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailBody<'a> {
    to: &'a str,
    subject: &'a str,
    template: &'a str,
    vars: &'a Map<String, Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CustomFieldBody<'a> {
    identifier: &'a str,
    field_key: &'a str,
    value: &'a Value,
    operation: FieldOperation,
}

/// 通过 HTTP 调用投递服务
pub struct HttpNotificationDispatcher {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpNotificationDispatcher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::DispatchTimeout {
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    EngineError::Dispatch(format!("请求投递服务失败: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Dispatch(format!("HTTP {}", status.as_u16())));
        }

        debug!(url = %url, status = status.as_u16(), "投递成功");
        Ok(())
    }
}

#[async_trait]
impl NotificationDispatcher for HttpNotificationDispatcher {
    async fn send_field_update(
        &self,
        identifier: &str,
        field_key: &str,
        message: &str,
    ) -> Result<()> {
        self.post(
            "/field-updates",
            &FieldUpdateBody {
                identifier,
                field_key,
                message,
            },
        )
        .await
    }

    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        template: &str,
        vars: &Map<String, Value>,
    ) -> Result<()> {
        self.post(
            "/emails",
            &EmailBody {
                to,
                subject,
                template,
                vars,
            },
        )
        .await
    }

    async fn set_custom_field(
        &self,
        identifier: &str,
        field_key: &str,
        value: &Value,
        operation: FieldOperation,
    ) -> Result<()> {
        self.post(
            "/custom-fields",
            &CustomFieldBody {
                identifier,
                field_key,
                value,
                operation,
            },
        )
        .await
    }
}
