//! 会员引擎错误类型
//!
//! 重复提交和策略拦截都不是错误：前者返回原结果，后者把请求留在 pending。
//! 这里只定义真正中断调用的错误。

use member_shared::error::SharedError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    // === 请求相关错误 ===
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("请求不存在: {0}")]
    RequestNotFound(String),

    // === 账本相关错误 ===
    #[error("积分余额不足: 需要 {required}, 可用 {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("账本并发写冲突: customer_id={customer_id}")]
    LedgerConflict { customer_id: String },

    // === 自动化相关错误 ===
    #[error("自动化不存在: {0}")]
    AutomationNotFound(String),

    #[error("状态流转非法: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    // === 外部投递错误 ===
    #[error("通知投递失败: {0}")]
    Dispatch(String),

    #[error("通知投递超时: {timeout_ms}ms")]
    DispatchTimeout { timeout_ms: u64 },

    // === 系统错误 ===
    #[error("资源锁冲突: {resource}")]
    LockConflict { resource: String },

    #[error("存储调用超时: {operation}")]
    StoreTimeout { operation: String },

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis 错误: {0}")]
    Redis(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// 瞬时错误，可退避重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LedgerConflict { .. }
                | Self::LockConflict { .. }
                | Self::Dispatch(_)
                | Self::DispatchTimeout { .. }
                | Self::StoreTimeout { .. }
                | Self::Redis(_)
        )
    }

    /// 业务错误可以把原始信息返回给调用方，系统错误只返回通用描述
    pub fn is_business_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::RequestNotFound(_)
                | Self::InsufficientBalance { .. }
                | Self::AutomationNotFound(_)
                | Self::InvalidStatusTransition { .. }
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::RequestNotFound(_) => "REQUEST_NOT_FOUND",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::LedgerConflict { .. } => "LEDGER_CONFLICT",
            Self::AutomationNotFound(_) => "AUTOMATION_NOT_FOUND",
            Self::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::Dispatch(_) => "DISPATCH_FAILED",
            Self::DispatchTimeout { .. } => "DISPATCH_TIMEOUT",
            Self::LockConflict { .. } => "LOCK_CONFLICT",
            Self::StoreTimeout { .. } => "STORE_TIMEOUT",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 记录到执行日志中的简短原因，如 `timeout`
    pub fn outcome_reason(&self) -> String {
        match self {
            Self::DispatchTimeout { .. } | Self::StoreTimeout { .. } => "timeout".to_string(),
            Self::Dispatch(msg) => msg.clone(),
            Self::InsufficientBalance { .. } => "insufficient_balance".to_string(),
            Self::Validation(msg) => format!("invalid_config: {msg}"),
            other => other.error_code().to_lowercase(),
        }
    }
}

/// sqlx 错误中的串行化失败与死锁转换为账本冲突，交由上层重试；
/// 语句超时（57014）与等锁超时（55P03）转换为存储超时
pub(crate) fn map_ledger_db_error(err: sqlx::Error, customer_id: &str) -> EngineError {
    if let sqlx::Error::Database(ref db_err) = err {
        match db_err.code().as_deref() {
            Some("40001") | Some("40P01") => {
                return EngineError::LedgerConflict {
                    customer_id: customer_id.to_string(),
                };
            }
            Some("57014") | Some("55P03") => {
                return EngineError::StoreTimeout {
                    operation: "ledger_credit".to_string(),
                };
            }
            _ => {}
        }
    }
    EngineError::Database(err)
}

impl From<SharedError> for EngineError {
    fn from(err: SharedError) -> Self {
        match err {
            SharedError::Database(e) => Self::Database(e),
            SharedError::Serialization(e) => Self::Serialization(e),
            SharedError::Redis(e) => Self::Redis(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for EngineError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis(err.to_string())
    }
}
