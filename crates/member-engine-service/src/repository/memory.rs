//! 内存仓储
//!
//! 与 PostgreSQL 实现遵守相同的唯一性约束，用于本地调试和测试。
//! 所有写操作在同一把锁内完成，账本入账天然满足原子性。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use member_shared::events::EventType;
use parking_lot::Mutex;
use uuid::Uuid;

use super::traits::{
    AutomationRepositoryTrait, DecisionUpdate, ExecutionRepositoryTrait, LedgerRepositoryTrait,
    PolicyRepositoryTrait, RequestRepositoryTrait,
};
use crate::error::{EngineError, Result};
use crate::models::{
    ActionPolicy, ActionType, Automation, AutomationStatus, CreditResult, ExecutionRecord,
    LedgerCredit, MemberActionRequest, PointsLedgerEntry, RequestStatus,
};

#[derive(Default)]
struct Tables {
    requests: HashMap<Uuid, MemberActionRequest>,
    /// (business_id, idempotency_key) -> request_id
    request_keys: HashMap<(String, String), Uuid>,
    ledger: Vec<PointsLedgerEntry>,
    /// source_ref -> ledger 下标
    ledger_refs: HashMap<String, usize>,
    balances: HashMap<(String, String), i64>,
    policies: HashMap<(String, ActionType), ActionPolicy>,
    automations: HashMap<Uuid, Automation>,
    executions: Vec<ExecutionRecord>,
    execution_keys: HashMap<(Uuid, String), usize>,
}

/// 进程内存储，同时实现全部仓储接口
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestRepositoryTrait for MemoryStore {
    async fn find_by_idempotency_key(
        &self,
        business_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<MemberActionRequest>> {
        let tables = self.tables.lock();
        Ok(tables
            .request_keys
            .get(&(business_id.to_string(), idempotency_key.to_string()))
            .and_then(|id| tables.requests.get(id))
            .cloned())
    }

    async fn get(&self, id: Uuid) -> Result<Option<MemberActionRequest>> {
        Ok(self.tables.lock().requests.get(&id).cloned())
    }

    async fn insert(&self, request: &MemberActionRequest) -> Result<bool> {
        let mut tables = self.tables.lock();
        let key = (
            request.business_id.clone(),
            request.idempotency_key.clone(),
        );
        if tables.request_keys.contains_key(&key) {
            return Ok(false);
        }
        tables.request_keys.insert(key, request.id);
        tables.requests.insert(request.id, request.clone());
        Ok(true)
    }

    async fn update_decision(&self, id: Uuid, update: &DecisionUpdate) -> Result<()> {
        let mut tables = self.tables.lock();
        let request = tables
            .requests
            .get_mut(&id)
            .ok_or_else(|| EngineError::RequestNotFound(id.to_string()))?;
        request.status = update.status;
        request.decision_reason = update.reason;
        request.decided_at = update.decided_at;
        request.decided_by = update.decided_by.clone();
        request.review_note = update.review_note.clone();
        Ok(())
    }

    async fn count_approved_since(
        &self,
        business_id: &str,
        customer_id: &str,
        action_type: ActionType,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let tables = self.tables.lock();
        let count = tables
            .requests
            .values()
            .filter(|r| {
                r.business_id == business_id
                    && r.customer_id == customer_id
                    && r.action_type == action_type
                    && r.status.is_approved()
                    && r.created_at >= since
            })
            .count();
        Ok(count as i64)
    }

    async fn latest_request_before(
        &self,
        business_id: &str,
        customer_id: &str,
        action_type: ActionType,
        created_at: DateTime<Utc>,
        id: Uuid,
    ) -> Result<Option<DateTime<Utc>>> {
        let tables = self.tables.lock();
        Ok(tables
            .requests
            .values()
            .filter(|r| {
                (r.created_at, r.id) < (created_at, id)
                    && r.business_id == business_id
                    && r.customer_id == customer_id
                    && r.action_type == action_type
                    && r.status != RequestStatus::Rejected
            })
            .map(|r| r.created_at)
            .max())
    }

    async fn list_pending(&self, business_id: &str, limit: i64) -> Result<Vec<MemberActionRequest>> {
        let tables = self.tables.lock();
        let mut pending: Vec<_> = tables
            .requests
            .values()
            .filter(|r| r.business_id == business_id && r.status == RequestStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }
}

#[async_trait]
impl LedgerRepositoryTrait for MemoryStore {
    async fn apply(&self, credit: &LedgerCredit) -> Result<CreditResult> {
        let mut tables = self.tables.lock();

        if let Some(&idx) = tables.ledger_refs.get(&credit.source_ref) {
            let existing = &tables.ledger[idx];
            return Ok(CreditResult {
                entry_id: existing.id,
                balance: existing.balance_after,
                applied: false,
            });
        }

        let key = (credit.business_id.clone(), credit.customer_id.clone());
        let current = tables.balances.get(&key).copied().unwrap_or(0);
        let next = credit.next_balance(current)?;

        let entry = credit.clone().into_entry(next);
        let result = CreditResult {
            entry_id: entry.id,
            balance: next,
            applied: true,
        };
        tables.balances.insert(key, next);
        let idx = tables.ledger.len();
        tables.ledger_refs.insert(credit.source_ref.clone(), idx);
        tables.ledger.push(entry);
        Ok(result)
    }

    async fn balance(&self, business_id: &str, customer_id: &str) -> Result<i64> {
        Ok(self
            .tables
            .lock()
            .balances
            .get(&(business_id.to_string(), customer_id.to_string()))
            .copied()
            .unwrap_or(0))
    }

    async fn history(
        &self,
        business_id: &str,
        customer_id: &str,
        limit: i64,
    ) -> Result<Vec<PointsLedgerEntry>> {
        let tables = self.tables.lock();
        Ok(tables
            .ledger
            .iter()
            .rev()
            .filter(|e| e.business_id == business_id && e.customer_id == customer_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PolicyRepositoryTrait for MemoryStore {
    async fn get(&self, business_id: &str, action_type: ActionType) -> Result<Option<ActionPolicy>> {
        Ok(self
            .tables
            .lock()
            .policies
            .get(&(business_id.to_string(), action_type))
            .cloned())
    }

    async fn upsert(&self, policy: &ActionPolicy) -> Result<()> {
        self.tables.lock().policies.insert(
            (policy.business_id.clone(), policy.action_type),
            policy.clone(),
        );
        Ok(())
    }

    async fn list(&self, business_id: &str) -> Result<Vec<ActionPolicy>> {
        let tables = self.tables.lock();
        let mut policies: Vec<_> = tables
            .policies
            .values()
            .filter(|p| p.business_id == business_id)
            .cloned()
            .collect();
        policies.sort_by_key(|p| p.action_type.as_str());
        Ok(policies)
    }
}

#[async_trait]
impl AutomationRepositoryTrait for MemoryStore {
    async fn create(&self, automation: &Automation) -> Result<()> {
        self.tables
            .lock()
            .automations
            .insert(automation.id, automation.clone());
        Ok(())
    }

    async fn update(&self, automation: &Automation, expected: AutomationStatus) -> Result<()> {
        let mut tables = self.tables.lock();
        let stored = tables
            .automations
            .get_mut(&automation.id)
            .ok_or_else(|| EngineError::AutomationNotFound(automation.id.to_string()))?;
        if stored.status != expected {
            return Err(EngineError::InvalidStatusTransition {
                from: stored.status.to_string(),
                to: automation.status.to_string(),
            });
        }
        // 计数器只由 record_execution 维护
        let counters = (
            stored.total_enrolled,
            stored.active_enrolled,
            stored.total_executions,
            stored.last_executed_at,
        );
        *stored = automation.clone();
        (
            stored.total_enrolled,
            stored.active_enrolled,
            stored.total_executions,
            stored.last_executed_at,
        ) = counters;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Automation>> {
        Ok(self.tables.lock().automations.get(&id).cloned())
    }

    async fn list(
        &self,
        business_id: &str,
        status: Option<AutomationStatus>,
    ) -> Result<Vec<Automation>> {
        let tables = self.tables.lock();
        let mut automations: Vec<_> = tables
            .automations
            .values()
            .filter(|a| a.business_id == business_id && status.is_none_or(|s| a.status == s))
            .cloned()
            .collect();
        automations.sort_by_key(|a| a.created_at);
        Ok(automations)
    }

    async fn list_published_for(
        &self,
        business_id: &str,
        trigger_type: EventType,
        template_id: &str,
    ) -> Result<Vec<Automation>> {
        let tables = self.tables.lock();
        let mut automations: Vec<_> = tables
            .automations
            .values()
            .filter(|a| a.business_id == business_id && a.accepts(trigger_type, template_id))
            .cloned()
            .collect();
        automations.sort_by_key(|a| a.created_at);
        Ok(automations)
    }

    async fn record_execution(&self, id: Uuid, enrolled: bool, at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.lock();
        let automation = tables
            .automations
            .get_mut(&id)
            .ok_or_else(|| EngineError::AutomationNotFound(id.to_string()))?;
        automation.total_executions += 1;
        if enrolled {
            automation.total_enrolled += 1;
            automation.active_enrolled += 1;
        }
        automation.last_executed_at = Some(at);
        Ok(())
    }
}

#[async_trait]
impl ExecutionRepositoryTrait for MemoryStore {
    async fn exists(&self, automation_id: Uuid, event_id: &str) -> Result<bool> {
        Ok(self
            .tables
            .lock()
            .execution_keys
            .contains_key(&(automation_id, event_id.to_string())))
    }

    async fn insert(&self, record: &ExecutionRecord) -> Result<bool> {
        let mut tables = self.tables.lock();
        let key = (record.automation_id, record.event_id.clone());
        if tables.execution_keys.contains_key(&key) {
            return Ok(false);
        }
        let idx = tables.executions.len();
        tables.execution_keys.insert(key, idx);
        tables.executions.push(record.clone());
        Ok(true)
    }

    async fn list_by_automation(
        &self,
        automation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ExecutionRecord>> {
        let tables = self.tables.lock();
        Ok(tables
            .executions
            .iter()
            .rev()
            .filter(|r| r.automation_id == automation_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
