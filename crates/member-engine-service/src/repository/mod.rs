//! 数据访问层
//!
//! 每个仓储对应一组表，Trait 定义见 `traits`，
//! PostgreSQL 实现用于生产，`MemoryStore` 用于本地调试与测试。

pub mod automation_repo;
pub mod execution_repo;
pub mod ledger_repo;
pub mod memory;
pub mod policy_repo;
pub mod request_repo;
pub mod traits;

pub use automation_repo::AutomationRepository;
pub use execution_repo::ExecutionRepository;
pub use ledger_repo::LedgerRepository;
pub use memory::MemoryStore;
pub use policy_repo::PolicyRepository;
pub use request_repo::RequestRepository;
pub use traits::{
    AutomationRepositoryTrait, DecisionUpdate, ExecutionRepositoryTrait, LedgerRepositoryTrait,
    PolicyRepositoryTrait, RequestRepositoryTrait,
};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tracing::warn;

use crate::error::{EngineError, Result};

/// 存储调用的默认超时
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// 为一次存储调用加上超时，超时视为瞬时错误
pub async fn bounded<T>(
    limit: Duration,
    operation: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, timeout_ms = limit.as_millis() as u64, "存储调用超时");
            Err(EngineError::StoreTimeout {
                operation: operation.to_string(),
            })
        }
    }
}

/// 一组仓储实例，按存储后端组装
#[derive(Clone)]
pub struct Repositories {
    pub requests: Arc<dyn RequestRepositoryTrait>,
    pub ledger: Arc<dyn LedgerRepositoryTrait>,
    pub policies: Arc<dyn PolicyRepositoryTrait>,
    pub automations: Arc<dyn AutomationRepositoryTrait>,
    pub executions: Arc<dyn ExecutionRepositoryTrait>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            requests: Arc::new(RequestRepository::new(pool.clone())),
            ledger: Arc::new(LedgerRepository::new(pool.clone())),
            policies: Arc::new(PolicyRepository::new(pool.clone())),
            automations: Arc::new(AutomationRepository::new(pool.clone())),
            executions: Arc::new(ExecutionRepository::new(pool)),
        }
    }

    /// 所有仓储共用同一个内存存储
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            requests: store.clone(),
            ledger: store.clone(),
            policies: store.clone(),
            automations: store.clone(),
            executions: store,
        }
    }
}
