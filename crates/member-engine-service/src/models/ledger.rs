//! 积分账本实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// 单笔流水的积分变动上限（绝对值）
pub const MAX_POINTS_PER_ENTRY: i64 = 100_000_000;

/// 积分流水
///
/// `source_ref` 全局唯一，同一来源（请求或自动化动作）最多入账一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PointsLedgerEntry {
    pub id: Uuid,
    pub business_id: String,
    pub customer_id: String,
    pub delta: i64,
    pub reason: String,
    /// 由会员请求产生的流水关联请求 ID
    #[sqlx(default)]
    pub source_request_id: Option<Uuid>,
    pub source_ref: String,
    /// 入账后余额
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

/// 入账指令
#[derive(Debug, Clone)]
pub struct LedgerCredit {
    pub business_id: String,
    pub customer_id: String,
    /// 正数加分，负数扣分
    pub delta: i64,
    pub reason: String,
    pub source_request_id: Option<Uuid>,
    pub source_ref: String,
}

impl LedgerCredit {
    /// 计算入账后的余额，溢出视为非法入账，结果为负视为余额不足
    pub fn next_balance(&self, current: i64) -> Result<i64> {
        let next = current.checked_add(self.delta).ok_or_else(|| {
            EngineError::Validation(format!(
                "积分余额溢出: 当前 {current}, 变动 {}",
                self.delta
            ))
        })?;
        if next < 0 {
            return Err(EngineError::InsufficientBalance {
                required: self.delta.saturating_neg(),
                available: current,
            });
        }
        Ok(next)
    }

    pub fn into_entry(self, balance_after: i64) -> PointsLedgerEntry {
        PointsLedgerEntry {
            id: Uuid::now_v7(),
            business_id: self.business_id,
            customer_id: self.customer_id,
            delta: self.delta,
            reason: self.reason,
            source_request_id: self.source_request_id,
            source_ref: self.source_ref,
            balance_after,
            created_at: Utc::now(),
        }
    }
}

/// 入账结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditResult {
    pub entry_id: Uuid,
    /// 该流水入账后的余额
    pub balance: i64,
    /// false 表示该来源已入账过，本次为幂等返回
    pub applied: bool,
}
