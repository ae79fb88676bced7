//! Axum 路由共享的应用状态

use std::sync::Arc;
use std::time::Duration;

use member_shared::config::EngineConfig;
use member_shared::retry::RetryPolicy;

use crate::approval::ApprovalEngine;
use crate::automation::AutomationEngine;
use crate::executor::{ActionExecutor, ExecutorConfig};
use crate::lock::LockManager;
use crate::notification::NotificationDispatcher;
use crate::policy::PolicyResolver;
use crate::repository::Repositories;
use crate::service::{AutomationService, LedgerService, RequestService};

const LEDGER_INITIAL_BACKOFF_MS: u64 = 20;

/// 各服务通过 Arc 在 handler 间共享
#[derive(Clone)]
pub struct AppState {
    pub requests: Arc<RequestService>,
    pub ledger: Arc<LedgerService>,
    pub policies: Arc<PolicyResolver>,
    pub automations: Arc<AutomationService>,
    pub engine: Arc<AutomationEngine>,
}

impl AppState {
    /// 按依赖顺序组装各服务
    pub fn build(
        repos: Repositories,
        locks: Arc<LockManager>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        config: &EngineConfig,
    ) -> Self {
        let store_timeout = Duration::from_millis(config.store_timeout_ms);
        let ledger = Arc::new(
            LedgerService::new(
                repos.ledger,
                RetryPolicy::with_backoff_ms(config.ledger_max_retries, LEDGER_INITIAL_BACKOFF_MS),
            )
            .with_store_timeout(store_timeout),
        );
        let policies = Arc::new(PolicyResolver::new(
            repos.policies,
            config.policy_cache_ttl_seconds,
        ));
        let approval = Arc::new(ApprovalEngine::new(
            repos.requests.clone(),
            policies.clone(),
            ledger.clone(),
            locks.clone(),
        ));
        let requests = Arc::new(RequestService::new(repos.requests, approval, locks.clone()));

        let executor = Arc::new(ActionExecutor::new(
            ledger.clone(),
            dispatcher,
            ExecutorConfig::from(config),
        ));
        let engine = Arc::new(
            AutomationEngine::new(
                repos.automations.clone(),
                repos.executions.clone(),
                executor,
                locks,
            )
            .with_store_timeout(store_timeout),
        );
        let automations = Arc::new(AutomationService::new(repos.automations, repos.executions));

        Self {
            requests,
            ledger,
            policies,
            automations,
            engine,
        }
    }
}
