//! 单个自动化动作的执行
//!
//! 外部投递逐次尝试，每次尝试带超时，可重试错误按指数退避重试，
//! 最终失败记录为 `failed:<原因>`，不中断同一执行中的后续动作。
//! 积分入账经由账本服务，账本冲突在那一层重试。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use member_shared::config::EngineConfig;
use member_shared::events::DomainEvent;
use member_shared::observability::metrics;
use member_shared::retry::RetryPolicy;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{
    ActionOutcome, AddPointsConfig, AutomationAction, CustomFieldConfig, DispatchAttempt,
    EmailConfig, LedgerCredit, OutcomeStatus, PushNotificationConfig,
};
use crate::notification::{NotificationDispatcher, template};
use crate::service::LedgerService;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// 单次投递尝试的超时
    pub dispatch_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for ExecutorConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            dispatch_timeout: Duration::from_millis(config.dispatch_timeout_ms),
            retry_policy: RetryPolicy::with_backoff_ms(
                config.dispatch_max_retries,
                config.dispatch_initial_backoff_ms,
            ),
        }
    }
}

/// 单次执行内共享的上下文
///
/// `vars` 初始为事件的评估上下文，前序动作的结果（如 `points_balance`）写回其中，
/// 供后续动作的文案渲染使用。
pub struct ExecutionContext<'a> {
    pub automation_id: Uuid,
    pub event: &'a DomainEvent,
    pub vars: Value,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(automation_id: Uuid, event: &'a DomainEvent) -> Self {
        Self {
            automation_id,
            event,
            vars: event.to_evaluation_context(),
        }
    }

    fn set_var(&mut self, key: &str, value: Value) {
        if let Value::Object(map) = &mut self.vars {
            map.insert(key.to_string(), value);
        }
    }

    fn ledger_source_ref(&self, index: usize) -> String {
        format!(
            "automation:{}:event:{}:action:{}",
            self.automation_id, self.event.event_id, index
        )
    }
}

pub struct ActionExecutor {
    ledger: Arc<LedgerService>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    config: ExecutorConfig,
}

impl ActionExecutor {
    pub fn new(
        ledger: Arc<LedgerService>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            ledger,
            dispatcher,
            config,
        }
    }

    /// 执行一个动作并返回结果，失败不返回 Err
    #[instrument(skip(self, action, ctx), fields(index, action = action.kind()))]
    pub async fn execute(
        &self,
        index: usize,
        action: &AutomationAction,
        ctx: &mut ExecutionContext<'_>,
    ) -> ActionOutcome {
        let (result, attempts) = match action {
            AutomationAction::AddPoints(config) => self.add_points(index, config, ctx).await,
            AutomationAction::UpdateCustomField(config) => {
                self.update_custom_field(config, ctx).await
            }
            AutomationAction::SendPushNotification(config) => self.send_push(config, ctx).await,
            AutomationAction::SendEmail(config) => self.send_email(config, ctx).await,
        };

        let outcome = match result {
            Ok(()) => OutcomeStatus::Succeeded,
            Err(e) => {
                warn!(error = %e, attempts = attempts.len(), "动作执行失败");
                OutcomeStatus::Failed(e.outcome_reason())
            }
        };
        metrics::record_action_outcome(action.kind(), outcome.is_success());

        ActionOutcome {
            index,
            action_type: action.kind().to_string(),
            outcome,
            attempts,
        }
    }

    async fn add_points(
        &self,
        index: usize,
        config: &AddPointsConfig,
        ctx: &mut ExecutionContext<'_>,
    ) -> (Result<()>, Vec<DispatchAttempt>) {
        let credit = LedgerCredit {
            business_id: ctx.event.business_id.clone(),
            customer_id: ctx.event.customer_id.clone(),
            delta: config.points,
            reason: config
                .reason
                .clone()
                .unwrap_or_else(|| format!("automation:{}", ctx.automation_id)),
            source_request_id: None,
            source_ref: ctx.ledger_source_ref(index),
        };

        let result = self.ledger.credit(credit).await;
        let attempt = DispatchAttempt {
            attempt: 1,
            succeeded: result.is_ok(),
            error: result.as_ref().err().map(EngineError::outcome_reason),
        };

        let result = result.map(|credit| {
            ctx.set_var("points_balance", json!(credit.balance));
            ctx.set_var("points_awarded", json!(config.points));
        });
        (result, vec![attempt])
    }

    async fn update_custom_field(
        &self,
        config: &CustomFieldConfig,
        ctx: &mut ExecutionContext<'_>,
    ) -> (Result<()>, Vec<DispatchAttempt>) {
        let identifier = ctx.event.pass_identifier();
        let value = match &config.value {
            Value::String(s) => Value::String(template::render(s, &ctx.vars)),
            other => other.clone(),
        };

        let (result, attempts) = self
            .dispatch("set_custom_field", || {
                self.dispatcher
                    .set_custom_field(&identifier, &config.field_key, &value, config.operation)
            })
            .await;

        if result.is_ok() {
            ctx.set_var(&format!("custom_field_{}", config.field_key), value);
        }
        (result, attempts)
    }

    async fn send_push(
        &self,
        config: &PushNotificationConfig,
        ctx: &mut ExecutionContext<'_>,
    ) -> (Result<()>, Vec<DispatchAttempt>) {
        let identifier = ctx.event.pass_identifier();
        let message = template::render(&config.message, &ctx.vars);
        debug!(identifier = %identifier, field_key = %config.field_key, "发送字段推送");

        self.dispatch("send_field_update", || {
            self.dispatcher
                .send_field_update(&identifier, &config.field_key, &message)
        })
        .await
    }

    async fn send_email(
        &self,
        config: &EmailConfig,
        ctx: &mut ExecutionContext<'_>,
    ) -> (Result<()>, Vec<DispatchAttempt>) {
        let Some(to) = ctx.event.email().map(str::to_string) else {
            return (
                Err(EngineError::Dispatch("missing_recipient".to_string())),
                Vec::new(),
            );
        };

        let subject = template::render(&config.subject, &ctx.vars);
        let vars: Map<String, Value> = config
            .vars
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => Value::String(template::render(s, &ctx.vars)),
                    other => other.clone(),
                };
                (key.clone(), rendered)
            })
            .collect();

        self.dispatch("send_email", || {
            self.dispatcher
                .send_email(&to, &subject, &config.template, &vars)
        })
        .await
    }

    /// 带超时与退避的投递循环，返回最终结果和每次尝试的记录
    async fn dispatch<F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
    ) -> (Result<()>, Vec<DispatchAttempt>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let policy = &self.config.retry_policy;
        let max_attempts = policy.max_attempts();
        let mut attempts = Vec::with_capacity(max_attempts as usize);

        for attempt in 1..=max_attempts {
            let result = match tokio::time::timeout(self.config.dispatch_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::DispatchTimeout {
                    timeout_ms: self.config.dispatch_timeout.as_millis() as u64,
                }),
            };

            match result {
                Ok(()) => {
                    metrics::record_dispatch_attempt(operation, "ok");
                    attempts.push(DispatchAttempt {
                        attempt,
                        succeeded: true,
                        error: None,
                    });
                    return (Ok(()), attempts);
                }
                Err(e) => {
                    let timed_out = matches!(e, EngineError::DispatchTimeout { .. });
                    metrics::record_dispatch_attempt(
                        operation,
                        if timed_out { "timeout" } else { "error" },
                    );
                    attempts.push(DispatchAttempt {
                        attempt,
                        succeeded: false,
                        error: Some(e.outcome_reason()),
                    });

                    if !e.is_retryable() || attempt == max_attempts {
                        return (Err(e), attempts);
                    }

                    let delay = policy.delay_for_attempt(attempt - 1);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "投递失败，退避后重试"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        (
            Err(EngineError::Internal("投递重试次数为 0".to_string())),
            attempts,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldOperation, OutcomeStatus};
    use crate::notification::MockNotificationDispatcher;
    use crate::repository::MemoryStore;
    use member_shared::events::EventType;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            dispatch_timeout: Duration::from_millis(50),
            retry_policy: RetryPolicy::with_backoff_ms(2, 1),
        }
    }

    fn executor(dispatcher: MockNotificationDispatcher) -> (ActionExecutor, Arc<LedgerService>) {
        let ledger = Arc::new(LedgerService::new(
            Arc::new(MemoryStore::new()),
            RetryPolicy::with_backoff_ms(3, 1),
        ));
        let executor = ActionExecutor::new(ledger.clone(), Arc::new(dispatcher), fast_config());
        (executor, ledger)
    }

    fn event(payload: Value) -> DomainEvent {
        DomainEvent::new(EventType::PassCreated, "biz-1", "tpl-1", "cust-1", payload)
    }

    #[tokio::test]
    async fn test_push_retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut dispatcher = MockNotificationDispatcher::new();
        dispatcher
            .expect_send_field_update()
            .times(3)
            .returning(move |_, _, _| {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(EngineError::Dispatch("HTTP 503".to_string()))
                } else {
                    Ok(())
                }
            });

        let (executor, _) = executor(dispatcher);
        let event = event(json!({"pass_id": "pass-9"}));
        let mut ctx = ExecutionContext::new(Uuid::now_v7(), &event);
        let action = AutomationAction::SendPushNotification(PushNotificationConfig {
            field_key: "news".to_string(),
            message: "欢迎".to_string(),
        });

        let outcome = executor.execute(0, &action, &mut ctx).await;

        assert_eq!(outcome.outcome, OutcomeStatus::Succeeded);
        assert_eq!(outcome.attempts.len(), 3);
        assert!(!outcome.attempts[0].succeeded);
        assert!(!outcome.attempts[1].succeeded);
        assert!(outcome.attempts[2].succeeded);
    }

    #[tokio::test]
    async fn test_exhausted_retries_marks_failed() {
        let mut dispatcher = MockNotificationDispatcher::new();
        dispatcher
            .expect_set_custom_field()
            .times(3)
            .returning(|_, _, _, _| Err(EngineError::Dispatch("HTTP 500".to_string())));

        let (executor, _) = executor(dispatcher);
        let event = event(json!({}));
        let mut ctx = ExecutionContext::new(Uuid::now_v7(), &event);
        let action = AutomationAction::UpdateCustomField(CustomFieldConfig {
            field_key: "visits".to_string(),
            value: json!(1),
            operation: FieldOperation::Increment,
        });

        let outcome = executor.execute(1, &action, &mut ctx).await;
        assert_eq!(outcome.outcome, OutcomeStatus::Failed("HTTP 500".to_string()));
        assert_eq!(outcome.attempts.len(), 3);
    }

    #[tokio::test]
    async fn test_add_points_exposes_balance_to_later_actions() {
        let mut dispatcher = MockNotificationDispatcher::new();
        dispatcher
            .expect_send_field_update()
            .withf(|identifier, _, message| identifier == "cust-1" && message == "当前积分 100")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let (executor, ledger) = executor(dispatcher);
        let event = event(json!({}));
        let mut ctx = ExecutionContext::new(Uuid::now_v7(), &event);

        let add = AutomationAction::AddPoints(AddPointsConfig {
            points: 100,
            reason: None,
        });
        let push = AutomationAction::SendPushNotification(PushNotificationConfig {
            field_key: "balance".to_string(),
            message: "当前积分 {{points_balance}}".to_string(),
        });

        assert!(executor.execute(0, &add, &mut ctx).await.outcome.is_success());
        assert!(executor.execute(1, &push, &mut ctx).await.outcome.is_success());
        assert_eq!(ledger.balance("biz-1", "cust-1").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_email_without_recipient_fails_without_dispatch() {
        let dispatcher = MockNotificationDispatcher::new();
        let (executor, _) = executor(dispatcher);
        let event = event(json!({}));
        let mut ctx = ExecutionContext::new(Uuid::now_v7(), &event);
        let action = AutomationAction::SendEmail(EmailConfig {
            subject: "欢迎".to_string(),
            template: "welcome".to_string(),
            vars: Map::new(),
        });

        let outcome = executor.execute(0, &action, &mut ctx).await;
        assert_eq!(
            outcome.outcome,
            OutcomeStatus::Failed("missing_recipient".to_string())
        );
        assert!(outcome.attempts.is_empty());
    }
}
