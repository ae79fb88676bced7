//! 锁管理器
//!
//! Redis 优先、进程内锁后备。

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use member_shared::config::EngineConfig;
use redis::Client as RedisClient;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};

const RELEASE_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("del", KEYS[1])
    else
        return 0
    end
"#;

/// 锁配置
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// 默认锁超时时间
    pub default_ttl: Duration,
    /// 获取锁重试次数
    pub retry_count: u32,
    /// 重试间隔
    pub retry_delay: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(30),
            retry_count: 50,
            retry_delay: Duration::from_millis(20),
        }
    }
}

impl From<&EngineConfig> for LockConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            default_ttl: Duration::from_secs(config.lock_ttl_seconds),
            retry_count: config.lock_retry_count,
            retry_delay: Duration::from_millis(config.lock_retry_delay_ms),
        }
    }
}

type LocalLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// 锁管理器
pub struct LockManager {
    redis_client: Option<RedisClient>,
    local: LocalLocks,
    config: LockConfig,
    /// 实例唯一标识，用于区分不同服务实例持有的锁
    instance_id: String,
}

impl LockManager {
    pub fn new(redis_client: Option<RedisClient>, config: LockConfig) -> Self {
        Self {
            redis_client,
            local: Arc::new(DashMap::new()),
            config,
            instance_id: Uuid::now_v7().to_string(),
        }
    }

    /// 仅使用进程内锁
    pub fn local(config: LockConfig) -> Self {
        Self::new(None, config)
    }

    /// 获取锁
    ///
    /// 在重试次数内无法获取时返回 `LockConflict`
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn acquire(&self, key: &str, ttl: Option<Duration>) -> Result<LockGuard> {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let owner = format!("{}:{}", self.instance_id, Uuid::new_v4());

        if let Some(ref client) = self.redis_client {
            match self.acquire_redis(client, key, &owner, ttl).await {
                Ok(Some(guard)) => return Ok(guard),
                Ok(None) => {
                    return Err(EngineError::LockConflict {
                        resource: key.to_string(),
                    });
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Redis 锁不可用，降级为进程内锁");
                }
            }
        }

        self.acquire_local(key, owner).await
    }

    async fn acquire_redis(
        &self,
        client: &RedisClient,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> std::result::Result<Option<LockGuard>, redis::RedisError> {
        let lock_key = format!("lock:{key}");
        let ttl_ms = ttl.as_millis() as u64;
        let mut conn = client.get_multiplexed_async_connection().await?;

        for attempt in 0..=self.config.retry_count {
            // SET NX 成功时返回 "OK"，键已存在时返回 nil
            let result: Option<String> = redis::cmd("SET")
                .arg(&lock_key)
                .arg(owner)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await?;

            if result.is_some() {
                debug!(key = %key, owner = %owner, attempt, "获取 Redis 锁");
                return Ok(Some(LockGuard {
                    key: key.to_string(),
                    owner: owner.to_string(),
                    backend: LockBackend::Redis(client.clone()),
                    released: false,
                }));
            }

            if attempt < self.config.retry_count {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        Ok(None)
    }

    async fn acquire_local(&self, key: &str, owner: String) -> Result<LockGuard> {
        let mutex = self
            .local
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let wait = self.config.retry_delay * self.config.retry_count.max(1);
        match tokio::time::timeout(wait, mutex.lock_owned()).await {
            Ok(guard) => {
                debug!(key = %key, owner = %owner, "获取进程内锁");
                Ok(LockGuard {
                    key: key.to_string(),
                    owner,
                    backend: LockBackend::Local {
                        guard: Some(guard),
                        registry: self.local.clone(),
                    },
                    released: false,
                })
            }
            Err(_) => Err(EngineError::LockConflict {
                resource: key.to_string(),
            }),
        }
    }

    /// 当前进程内锁表中的键数量
    pub fn local_lock_count(&self) -> usize {
        self.local.len()
    }
}

/// 锁守卫
///
/// Redis 锁必须调用 `release()` 显式释放，Drop 中只能依赖 TTL 过期；
/// 进程内锁在 Drop 时同步释放。
pub struct LockGuard {
    key: String,
    owner: String,
    backend: LockBackend,
    released: bool,
}

enum LockBackend {
    Redis(RedisClient),
    Local {
        guard: Option<OwnedMutexGuard<()>>,
        registry: LocalLocks,
    },
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// 显式释放锁
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match &mut self.backend {
            LockBackend::Redis(client) => {
                let mut conn = client.get_multiplexed_async_connection().await?;
                // 只删除自己持有的锁
                let deleted: i32 = redis::Script::new(RELEASE_SCRIPT)
                    .key(format!("lock:{}", self.key))
                    .arg(&self.owner)
                    .invoke_async(&mut conn)
                    .await?;

                if deleted == 0 {
                    warn!(key = %self.key, owner = %self.owner, "锁已过期或被其他实例持有");
                } else {
                    debug!(key = %self.key, "Redis 锁已释放");
                }
                Ok(())
            }
            LockBackend::Local { guard, registry } => {
                release_local(&self.key, guard, registry);
                Ok(())
            }
        }
    }
}

fn release_local(key: &str, guard: &mut Option<OwnedMutexGuard<()>>, registry: &LocalLocks) {
    if let Some(held) = guard.take() {
        drop(held);
        // 没有其他等待者时回收锁表条目
        registry.remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
        debug!(key = %key, "进程内锁已释放");
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match &mut self.backend {
            LockBackend::Local { guard, registry } => release_local(&self.key, guard, registry),
            LockBackend::Redis(_) if !self.released => {
                warn!(
                    lock_key = %self.key,
                    owner = %self.owner,
                    "LockGuard 未显式释放，等待 TTL 过期"
                );
            }
            LockBackend::Redis(_) => {}
        }
    }
}
