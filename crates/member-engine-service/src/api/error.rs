//! 引擎错误到 HTTP 响应的映射

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::EngineError;

const GENERIC_MESSAGE: &str = "服务内部错误，请稍后重试";
const TRANSIENT_MESSAGE: &str = "服务繁忙，请稍后重试";

#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self(EngineError::from(errors))
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::RequestNotFound(_) | EngineError::AutomationNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            EngineError::InvalidStatusTransition { .. } | EngineError::InsufficientBalance { .. } => {
                StatusCode::CONFLICT
            }
            EngineError::LedgerConflict { .. }
            | EngineError::LockConflict { .. }
            | EngineError::Dispatch(_)
            | EngineError::DispatchTimeout { .. }
            | EngineError::StoreTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Database(_)
            | EngineError::Serialization(_)
            | EngineError::Redis(_)
            | EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = &self.0;

        // 系统错误只返回通用提示，详细信息写日志
        let message = if err.is_business_error() {
            err.to_string()
        } else if err.is_retryable() {
            tracing::warn!(error = %err, code = err.error_code(), "瞬时错误");
            TRANSIENT_MESSAGE.to_string()
        } else {
            tracing::error!(error = %err, code = err.error_code(), "请求处理失败");
            GENERIC_MESSAGE.to_string()
        };

        let body = json!({
            "success": false,
            "code": err.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, Json(body)).into_response()
    }
}
