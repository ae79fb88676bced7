//! 自动化执行引擎
//!
//! ## 执行流程
//!
//! 1. 查询响应该事件的已发布自动化（触发类型 + 模板）
//! 2. 各自动化并发执行，每个执行持有 `execution:{automation_id}:{event_id}` 锁
//! 3. 已有执行记录则跳过（事件重投）
//! 4. 条件全部满足时按声明顺序执行动作，前序动作的结果写入上下文
//! 5. 追加执行记录，匹配时递增计数器

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use member_shared::events::DomainEvent;
use member_shared::observability::metrics;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::evaluator::ConditionEvaluator;
use crate::error::Result;
use crate::executor::{ActionExecutor, ExecutionContext};
use crate::lock::LockManager;
use crate::models::{Automation, ExecutionRecord};
use crate::repository::{
    AutomationRepositoryTrait, DEFAULT_STORE_TIMEOUT, ExecutionRepositoryTrait, bounded,
};

pub struct AutomationEngine {
    automations: Arc<dyn AutomationRepositoryTrait>,
    executions: Arc<dyn ExecutionRepositoryTrait>,
    executor: Arc<ActionExecutor>,
    locks: Arc<LockManager>,
    store_timeout: Duration,
}

impl AutomationEngine {
    pub fn new(
        automations: Arc<dyn AutomationRepositoryTrait>,
        executions: Arc<dyn ExecutionRepositoryTrait>,
        executor: Arc<ActionExecutor>,
        locks: Arc<LockManager>,
    ) -> Self {
        Self {
            automations,
            executions,
            executor,
            locks,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// 查询与写入执行记录、更新计数器时的超时
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// 处理一个领域事件，返回本次新写入的执行记录
    ///
    /// 单个自动化失败只记录日志，不影响其他自动化。
    /// 已执行过该事件的自动化不会出现在返回值中。
    #[instrument(
        skip(self, event),
        fields(
            event_id = %event.event_id,
            event_type = %event.event_type,
            business_id = %event.business_id,
            customer_id = %event.customer_id
        )
    )]
    pub async fn on_event(&self, event: &DomainEvent) -> Result<Vec<ExecutionRecord>> {
        let automations = bounded(
            self.store_timeout,
            "list_published_automations",
            self.automations.list_published_for(
                &event.business_id,
                event.event_type,
                &event.template_id,
            ),
        )
        .await?;

        if automations.is_empty() {
            debug!("没有响应该事件的自动化");
            return Ok(Vec::new());
        }

        info!(candidates = automations.len(), "开始执行自动化");

        let results = join_all(
            automations
                .iter()
                .map(|automation| self.run_guarded(automation, event)),
        )
        .await;

        let mut records = Vec::with_capacity(results.len());
        for (automation, result) in automations.iter().zip(results) {
            match result {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => {
                    error!(automation_id = %automation.id, error = %e, "自动化执行失败");
                }
            }
        }

        Ok(records)
    }

    async fn run_guarded(
        &self,
        automation: &Automation,
        event: &DomainEvent,
    ) -> Result<Option<ExecutionRecord>> {
        let key = format!("execution:{}:{}", automation.id, event.event_id);
        let guard = self.locks.acquire(&key, None).await?;
        let result = self.run(automation, event).await;
        if let Err(e) = guard.release().await {
            warn!(error = %e, "释放执行锁失败");
        }
        result
    }

    #[instrument(skip(self, automation, event), fields(automation_id = %automation.id))]
    async fn run(
        &self,
        automation: &Automation,
        event: &DomainEvent,
    ) -> Result<Option<ExecutionRecord>> {
        let executed = bounded(
            self.store_timeout,
            "execution_exists",
            self.executions.exists(automation.id, &event.event_id),
        )
        .await?;
        if executed {
            info!("事件已执行过，跳过");
            return Ok(None);
        }

        let started = Instant::now();
        let started_at = Utc::now();
        let event_context = event.to_evaluation_context();

        let matched = match ConditionEvaluator::matches_all(&automation.conditions, &event_context) {
            Ok(matched) => matched,
            Err(e) => {
                warn!(error = %e, "条件求值出错，按不匹配处理");
                false
            }
        };

        let mut outcomes = Vec::new();
        if matched {
            let mut ctx = ExecutionContext::new(automation.id, event);
            for (index, action) in automation.actions.iter().enumerate() {
                outcomes.push(self.executor.execute(index, action, &mut ctx).await);
            }
        }

        let record = ExecutionRecord {
            id: Uuid::now_v7(),
            automation_id: automation.id,
            business_id: automation.business_id.clone(),
            event_id: event.event_id.clone(),
            event_type: event.event_type,
            customer_id: event.customer_id.clone(),
            event_context,
            matched,
            outcomes,
            started_at,
            finished_at: Utc::now(),
        };

        let inserted = bounded(
            self.store_timeout,
            "insert_execution",
            self.executions.insert(&record),
        )
        .await?;
        if !inserted {
            // 并发投递已由另一实例写入
            info!("执行记录已存在，跳过计数");
            return Ok(None);
        }

        if matched {
            bounded(
                self.store_timeout,
                "record_execution",
                self.automations.record_execution(
                    automation.id,
                    event.event_type.is_enrollment(),
                    record.finished_at,
                ),
            )
            .await?;
        }

        metrics::record_automation_execution(
            event.event_type.as_str(),
            matched,
            started.elapsed().as_secs_f64(),
        );
        info!(
            execution_id = %record.id,
            matched,
            actions = record.outcomes.len(),
            failed = record.failed_actions(),
            "自动化执行完成"
        );

        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorConfig;
    use crate::lock::LockConfig;
    use crate::models::{
        AddPointsConfig, AutomationAction, AutomationStatus, Condition, Operator,
    };
    use crate::notification::MockNotificationDispatcher;
    use crate::repository::MemoryStore;
    use crate::service::LedgerService;
    use member_shared::events::EventType;
    use member_shared::retry::RetryPolicy;
    use serde_json::json;

    fn automation(conditions: Vec<Condition>) -> Automation {
        let now = Utc::now();
        Automation {
            id: Uuid::now_v7(),
            business_id: "biz-1".to_string(),
            name: "欢迎积分".to_string(),
            description: None,
            status: AutomationStatus::Published,
            trigger_type: EventType::PassCreated,
            trigger_config: json!({}),
            conditions,
            actions: vec![AutomationAction::AddPoints(AddPointsConfig {
                points: 100,
                reason: None,
            })],
            template_id: "tpl-1".to_string(),
            total_enrolled: 0,
            active_enrolled: 0,
            total_executions: 0,
            last_executed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn engine(store: Arc<MemoryStore>) -> (AutomationEngine, Arc<LedgerService>) {
        let ledger = Arc::new(LedgerService::new(
            store.clone(),
            RetryPolicy::with_backoff_ms(3, 1),
        ));
        let executor = Arc::new(ActionExecutor::new(
            ledger.clone(),
            Arc::new(MockNotificationDispatcher::new()),
            ExecutorConfig::default(),
        ));
        let engine = AutomationEngine::new(
            store.clone(),
            store,
            executor,
            Arc::new(LockManager::local(LockConfig::default())),
        );
        (engine, ledger)
    }

    #[tokio::test]
    async fn test_matched_event_credits_and_counts() {
        let store = Arc::new(MemoryStore::new());
        let automation = automation(vec![]);
        store.create(&automation).await.unwrap();
        let (engine, ledger) = engine(store.clone());

        let event = DomainEvent::new(EventType::PassCreated, "biz-1", "tpl-1", "cust-1", json!({}));
        let records = engine.on_event(&event).await.unwrap();

        assert_eq!(records.len(), 1);
        assert!(records[0].matched);
        assert_eq!(ledger.balance("biz-1", "cust-1").await.unwrap(), 100);

        let stored = AutomationRepositoryTrait::get(store.as_ref(), automation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.total_executions, 1);
        assert_eq!(stored.total_enrolled, 1);
        assert_eq!(stored.active_enrolled, 1);
    }

    #[tokio::test]
    async fn test_redelivered_event_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        store.create(&automation(vec![])).await.unwrap();
        let (engine, ledger) = engine(store);

        let event = DomainEvent::new(EventType::PassCreated, "biz-1", "tpl-1", "cust-1", json!({}));
        assert_eq!(engine.on_event(&event).await.unwrap().len(), 1);
        assert!(engine.on_event(&event).await.unwrap().is_empty());
        assert_eq!(ledger.balance("biz-1", "cust-1").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_unmatched_conditions_write_record_without_counting() {
        let store = Arc::new(MemoryStore::new());
        let automation = automation(vec![Condition {
            field: "tier".to_string(),
            operator: Operator::Eq,
            value: json!("gold"),
        }]);
        store.create(&automation).await.unwrap();
        let (engine, ledger) = engine(store.clone());

        let event = DomainEvent::new(
            EventType::PassCreated,
            "biz-1",
            "tpl-1",
            "cust-1",
            json!({"tier": "silver"}),
        );
        let records = engine.on_event(&event).await.unwrap();

        assert_eq!(records.len(), 1);
        assert!(!records[0].matched);
        assert!(records[0].outcomes.is_empty());
        assert_eq!(ledger.balance("biz-1", "cust-1").await.unwrap(), 0);

        let stored = AutomationRepositoryTrait::get(store.as_ref(), automation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.total_executions, 0);
    }

    #[tokio::test]
    async fn test_other_template_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        store.create(&automation(vec![])).await.unwrap();
        let (engine, _) = engine(store);

        let event = DomainEvent::new(EventType::PassCreated, "biz-1", "tpl-2", "cust-1", json!({}));
        assert!(engine.on_event(&event).await.unwrap().is_empty());
    }
}
