//! 集成测试公共设施
//!
//! 全部基于内存存储与进程内锁，无需外部依赖

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use member_engine::api::AppState;
use member_engine::error::{EngineError, Result};
use member_engine::lock::{LockConfig, LockManager};
use member_engine::models::{
    ActionPolicy, ActionType, CreditResult, FieldOperation, LedgerCredit, NewActionRequest,
    PointsLedgerEntry,
};
use member_engine::notification::NotificationDispatcher;
use member_engine::repository::{LedgerRepositoryTrait, MemoryStore, Repositories};
use member_shared::config::{EngineConfig, StorageBackend};
use parking_lot::Mutex;
use serde_json::{Map, Value};

// ==================== 投递替身 ====================

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchCall {
    FieldUpdate {
        identifier: String,
        field_key: String,
        message: String,
    },
    Email {
        to: String,
        subject: String,
        template: String,
    },
    CustomField {
        identifier: String,
        field_key: String,
        value: Value,
    },
}

/// 可配置失败次数与延迟的投递替身
///
/// 前 `failures` 次调用返回 HTTP 503，之后成功；每次调用先等待 `delay`
#[derive(Default)]
pub struct FakeDispatcher {
    failures: AtomicU32,
    delay: Duration,
    calls: Mutex<Vec<DispatchCall>>,
    attempts: AtomicU32,
}

impl FakeDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(times: u32) -> Self {
        Self {
            failures: AtomicU32::new(times),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// 成功投递的调用
    pub fn calls(&self) -> Vec<DispatchCall> {
        self.calls.lock().clone()
    }

    /// 全部尝试次数，含失败
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    async fn attempt(&self, call: DispatchCall) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let should_fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(EngineError::Dispatch("HTTP 503".to_string()));
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl NotificationDispatcher for FakeDispatcher {
    async fn send_field_update(
        &self,
        identifier: &str,
        field_key: &str,
        message: &str,
    ) -> Result<()> {
        self.attempt(DispatchCall::FieldUpdate {
            identifier: identifier.to_string(),
            field_key: field_key.to_string(),
            message: message.to_string(),
        })
        .await
    }

    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        template: &str,
        _vars: &Map<String, Value>,
    ) -> Result<()> {
        self.attempt(DispatchCall::Email {
            to: to.to_string(),
            subject: subject.to_string(),
            template: template.to_string(),
        })
        .await
    }

    async fn set_custom_field(
        &self,
        identifier: &str,
        field_key: &str,
        value: &Value,
        _operation: FieldOperation,
    ) -> Result<()> {
        self.attempt(DispatchCall::CustomField {
            identifier: identifier.to_string(),
            field_key: field_key.to_string(),
            value: value.clone(),
        })
        .await
    }
}

// ==================== 账本替身 ====================

/// 入账永不返回的账本，查询委托给内存存储
pub struct StalledLedger {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl LedgerRepositoryTrait for StalledLedger {
    async fn apply(&self, _credit: &LedgerCredit) -> Result<CreditResult> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Err(EngineError::Internal("入账不应完成".to_string()))
    }

    async fn balance(&self, business_id: &str, customer_id: &str) -> Result<i64> {
        self.inner.balance(business_id, customer_id).await
    }

    async fn history(
        &self,
        business_id: &str,
        customer_id: &str,
        limit: i64,
    ) -> Result<Vec<PointsLedgerEntry>> {
        self.inner.history(business_id, customer_id, limit).await
    }
}

// ==================== 测试环境 ====================

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        storage: StorageBackend::Memory,
        dispatch_timeout_ms: 50,
        dispatch_max_retries: 2,
        dispatch_initial_backoff_ms: 1,
        store_timeout_ms: 50,
        ..EngineConfig::default()
    }
}

pub struct Harness {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub dispatcher: Arc<FakeDispatcher>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_dispatcher(FakeDispatcher::new())
    }

    pub fn with_dispatcher(dispatcher: FakeDispatcher) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(store.clone(), Repositories::memory(store), dispatcher)
    }

    /// 账本写入挂起，用于验证存储超时
    pub fn with_stalled_ledger() -> Self {
        let store = Arc::new(MemoryStore::new());
        let repos = Repositories {
            ledger: Arc::new(StalledLedger {
                inner: store.clone(),
            }),
            ..Repositories::memory(store.clone())
        };
        Self::build(store, repos, FakeDispatcher::new())
    }

    fn build(store: Arc<MemoryStore>, repos: Repositories, dispatcher: FakeDispatcher) -> Self {
        let dispatcher = Arc::new(dispatcher);
        let config = engine_config();
        let state = AppState::build(
            repos,
            Arc::new(LockManager::local(LockConfig::from(&config))),
            dispatcher.clone(),
            &config,
        );
        Self {
            state,
            store,
            dispatcher,
        }
    }

    pub async fn put_policy(&self, policy: ActionPolicy) {
        self.state
            .policies
            .upsert(&policy)
            .await
            .expect("写入策略失败");
    }

    pub async fn balance(&self, business_id: &str, customer_id: &str) -> i64 {
        self.state
            .ledger
            .balance(business_id, customer_id)
            .await
            .expect("查询余额失败")
    }
}

// ==================== 数据构造 ====================

/// 开启自动通过、无任何上限的策略
pub fn auto_policy(business_id: &str, action_type: ActionType, points_award: i64) -> ActionPolicy {
    ActionPolicy {
        business_id: business_id.to_string(),
        action_type,
        enabled: true,
        auto_approve: true,
        max_per_day: None,
        max_amount: None,
        cooldown_minutes: None,
        requires_evidence: false,
        requires_staff_review: false,
        points_award,
        updated_at: Utc::now(),
    }
}

pub fn submission(
    business_id: &str,
    customer_id: &str,
    action_type: &str,
    payload: Value,
    idempotency_key: &str,
) -> NewActionRequest {
    NewActionRequest {
        business_id: business_id.to_string(),
        program_id: "program-1".to_string(),
        customer_id: customer_id.to_string(),
        action_type: action_type.to_string(),
        payload,
        idempotency_key: idempotency_key.to_string(),
    }
}
