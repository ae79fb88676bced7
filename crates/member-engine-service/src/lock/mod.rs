//! 键级互斥锁
//!
//! Redis 可用时使用分布式锁，多实例部署下保证同一键的操作串行；
//! 未配置 Redis 或 Redis 故障时退化为进程内锁。
//!
//! ## 锁键约定
//!
//! - `request:{business_id}:{idempotency_key}`：请求受理
//! - `usage:{business_id}:{customer_id}:{action_type}`：额度统计与判定
//! - `execution:{automation_id}:{event_id}`：自动化执行
//!
//! 同时持有多把锁时按上面的顺序获取。
//!
//! ```ignore
//! let guard = lock_manager.acquire("usage:biz-1:cust-1:check_in", None).await?;
//! do_critical_work().await?;
//! guard.release().await?;
//! ```

mod lock_manager;

pub use lock_manager::{LockConfig, LockGuard, LockManager};
