//! 策略解析与缓存
//!
//! 按 `(business_id, action_type)` 缓存策略，未配置的组合同样缓存为空，
//! 避免每次提交都访问存储。运营人员通过本模块更新策略时立即失效对应条目，
//! 其他实例上的缓存在 TTL 到期后刷新。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{ActionPolicy, ActionType};
use crate::repository::PolicyRepositoryTrait;

#[derive(Clone)]
struct CachedPolicy {
    policy: Option<ActionPolicy>,
    fetched_at: Instant,
}

pub struct PolicyResolver {
    repo: Arc<dyn PolicyRepositoryTrait>,
    entries: RwLock<HashMap<(String, ActionType), CachedPolicy>>,
    cache_ttl: Duration,
}

impl PolicyResolver {
    pub fn new(repo: Arc<dyn PolicyRepositoryTrait>, ttl_seconds: u64) -> Self {
        Self {
            repo,
            entries: RwLock::new(HashMap::new()),
            cache_ttl: Duration::from_secs(ttl_seconds),
        }
    }

    /// 解析生效策略
    ///
    /// 返回 None 表示该商户未配置此行为类型，由调用方决定回退策略。
    /// 刷新失败时若有过期缓存则继续使用。
    pub async fn resolve(
        &self,
        business_id: &str,
        action_type: ActionType,
    ) -> Result<Option<ActionPolicy>> {
        let key = (business_id.to_string(), action_type);

        let stale = {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                Some(cached) if cached.fetched_at.elapsed() <= self.cache_ttl => {
                    return Ok(cached.policy.clone());
                }
                other => other.cloned(),
            }
        };

        match self.repo.get(business_id, action_type).await {
            Ok(policy) => {
                debug!(business_id, action_type = %action_type, found = policy.is_some(), "策略已加载");
                self.entries.write().await.insert(
                    key,
                    CachedPolicy {
                        policy: policy.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(policy)
            }
            Err(e) => match stale {
                Some(cached) => {
                    warn!(business_id, action_type = %action_type, error = %e, "刷新策略失败，使用过期缓存");
                    Ok(cached.policy)
                }
                None => Err(e),
            },
        }
    }

    /// 写入策略并失效缓存
    pub async fn upsert(&self, policy: &ActionPolicy) -> Result<()> {
        self.repo.upsert(policy).await?;
        self.invalidate(&policy.business_id, policy.action_type).await;
        Ok(())
    }

    pub async fn list(&self, business_id: &str) -> Result<Vec<ActionPolicy>> {
        self.repo.list(business_id).await
    }

    pub async fn invalidate(&self, business_id: &str, action_type: ActionType) {
        self.entries
            .write()
            .await
            .remove(&(business_id.to_string(), action_type));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::repository::traits::MockPolicyRepositoryTrait;

    fn policy(points_award: i64) -> ActionPolicy {
        ActionPolicy {
            points_award,
            auto_approve: true,
            requires_staff_review: false,
            ..ActionPolicy::conservative("biz-1", ActionType::CheckIn)
        }
    }

    #[tokio::test]
    async fn test_resolve_uses_cache_within_ttl() {
        let mut repo = MockPolicyRepositoryTrait::new();
        repo.expect_get()
            .times(1)
            .returning(|_, _| Ok(Some(policy(10))));

        let resolver = PolicyResolver::new(Arc::new(repo), 60);
        let first = resolver.resolve("biz-1", ActionType::CheckIn).await.unwrap();
        let second = resolver.resolve("biz-1", ActionType::CheckIn).await.unwrap();

        assert_eq!(first.unwrap().points_award, 10);
        assert_eq!(second.unwrap().points_award, 10);
    }

    #[tokio::test]
    async fn test_missing_policy_is_cached() {
        let mut repo = MockPolicyRepositoryTrait::new();
        repo.expect_get().times(1).returning(|_, _| Ok(None));

        let resolver = PolicyResolver::new(Arc::new(repo), 60);
        assert!(resolver.resolve("biz-1", ActionType::TicketUse).await.unwrap().is_none());
        assert!(resolver.resolve("biz-1", ActionType::TicketUse).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_invalidates_entry() {
        let mut repo = MockPolicyRepositoryTrait::new();
        let mut seq = mockall::Sequence::new();
        repo.expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Some(policy(10))));
        repo.expect_upsert().times(1).returning(|_| Ok(()));
        repo.expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Some(policy(25))));

        let resolver = PolicyResolver::new(Arc::new(repo), 60);
        resolver.resolve("biz-1", ActionType::CheckIn).await.unwrap();
        resolver.upsert(&policy(25)).await.unwrap();

        let refreshed = resolver.resolve("biz-1", ActionType::CheckIn).await.unwrap();
        assert_eq!(refreshed.unwrap().points_award, 25);
    }

    #[tokio::test]
    async fn test_stale_entry_served_when_refresh_fails() {
        let mut repo = MockPolicyRepositoryTrait::new();
        let mut seq = mockall::Sequence::new();
        repo.expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Some(policy(10))));
        repo.expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(EngineError::Internal("db down".to_string())));

        let resolver = PolicyResolver::new(Arc::new(repo), 0);
        resolver.resolve("biz-1", ActionType::CheckIn).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let stale = resolver.resolve("biz-1", ActionType::CheckIn).await.unwrap();
        assert_eq!(stale.unwrap().points_award, 10);
    }
}
