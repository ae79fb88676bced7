//! 请求与响应 DTO

use serde::{Deserialize, Serialize};

use crate::models::{AutomationStatus, PointsLedgerEntry};

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self::success_with_message(data, "操作成功")
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessQuery {
    pub business_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationListQuery {
    pub business_id: String,
    #[serde(default)]
    pub status: Option<AutomationStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

impl LimitQuery {
    pub fn limit_or(&self, default: i64) -> i64 {
        self.limit.unwrap_or(default).clamp(1, 500)
    }
}

/// 人工审核
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub approve: bool,
    pub staff_id: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// 会员积分视图
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerView {
    pub business_id: String,
    pub customer_id: String,
    pub balance: i64,
    pub entries: Vec<PointsLedgerEntry>,
}
