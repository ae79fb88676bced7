//! 仓储 Trait 定义
//!
//! 服务层只依赖这些抽象，PostgreSQL 与内存两种实现可互换

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use member_shared::events::EventType;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    ActionPolicy, ActionType, Automation, AutomationStatus, CreditResult, DecisionReason,
    ExecutionRecord, LedgerCredit, MemberActionRequest, PointsLedgerEntry, RequestStatus,
};

/// 判定结果写回
#[derive(Debug, Clone)]
pub struct DecisionUpdate {
    pub status: RequestStatus,
    pub reason: Option<DecisionReason>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
    pub review_note: Option<String>,
}

/// 会员请求仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RequestRepositoryTrait: Send + Sync {
    /// 幂等查询，必须直接访问持久化存储
    async fn find_by_idempotency_key(
        &self,
        business_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<MemberActionRequest>>;

    async fn get(&self, id: Uuid) -> Result<Option<MemberActionRequest>>;

    /// 插入新请求，幂等键已存在时返回 false
    async fn insert(&self, request: &MemberActionRequest) -> Result<bool>;

    async fn update_decision(&self, id: Uuid, update: &DecisionUpdate) -> Result<()>;

    /// 统计 since 之后已通过（自动或人工）的同类请求
    async fn count_approved_since(
        &self,
        business_id: &str,
        customer_id: &str,
        action_type: ActionType,
        since: DateTime<Utc>,
    ) -> Result<i64>;

    /// 排在指定请求之前的同类请求中，最近一条未被拒绝的提交时间
    ///
    /// 按 `(created_at, id)` 排序，之后提交的并发请求不计入
    async fn latest_request_before(
        &self,
        business_id: &str,
        customer_id: &str,
        action_type: ActionType,
        created_at: DateTime<Utc>,
        id: Uuid,
    ) -> Result<Option<DateTime<Utc>>>;

    async fn list_pending(&self, business_id: &str, limit: i64) -> Result<Vec<MemberActionRequest>>;
}

/// 积分账本仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerRepositoryTrait: Send + Sync {
    /// 原子入账
    ///
    /// 来源引用已存在时不写入，返回已有流水的结果；扣减后余额为负时返回
    /// `InsufficientBalance`。幂等检查与余额变更在同一临界区内完成。
    async fn apply(&self, credit: &LedgerCredit) -> Result<CreditResult>;

    async fn balance(&self, business_id: &str, customer_id: &str) -> Result<i64>;

    async fn history(
        &self,
        business_id: &str,
        customer_id: &str,
        limit: i64,
    ) -> Result<Vec<PointsLedgerEntry>>;
}

/// 策略仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PolicyRepositoryTrait: Send + Sync {
    async fn get(&self, business_id: &str, action_type: ActionType) -> Result<Option<ActionPolicy>>;
    async fn upsert(&self, policy: &ActionPolicy) -> Result<()>;
    async fn list(&self, business_id: &str) -> Result<Vec<ActionPolicy>>;
}

/// 自动化仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AutomationRepositoryTrait: Send + Sync {
    async fn create(&self, automation: &Automation) -> Result<()>;
    /// 覆盖写入定义字段与状态，不修改计数器
    ///
    /// 仅当存储中的状态仍为 `expected` 时写入，否则返回 `InvalidStatusTransition`
    async fn update(&self, automation: &Automation, expected: AutomationStatus) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Automation>>;
    async fn list(
        &self,
        business_id: &str,
        status: Option<AutomationStatus>,
    ) -> Result<Vec<Automation>>;
    /// 查询响应该事件的已发布自动化
    async fn list_published_for(
        &self,
        business_id: &str,
        trigger_type: EventType,
        template_id: &str,
    ) -> Result<Vec<Automation>>;
    /// 原子递增执行计数，enrolled 为 true 时同时递增注册计数
    async fn record_execution(&self, id: Uuid, enrolled: bool, at: DateTime<Utc>) -> Result<()>;
}

/// 执行记录仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionRepositoryTrait: Send + Sync {
    async fn exists(&self, automation_id: Uuid, event_id: &str) -> Result<bool>;
    /// 追加执行记录，(automation_id, event_id) 已存在时返回 false
    async fn insert(&self, record: &ExecutionRecord) -> Result<bool>;
    async fn list_by_automation(&self, automation_id: Uuid, limit: i64)
    -> Result<Vec<ExecutionRecord>>;
}
