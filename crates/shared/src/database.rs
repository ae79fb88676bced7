//! 数据库连接管理模块
//!
//! 提供 PostgreSQL 连接池管理，支持健康检查和 schema 迁移。

use crate::config::DatabaseConfig;
use crate::error::{Result, SharedError};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

/// 数据库连接池包装
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 创建数据库连接池
    #[instrument(skip(config))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!("正在连接数据库...");

        let statement_timeout_ms = config.statement_timeout_ms;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    // 行锁等待与慢查询都在服务端被取消，连接不会被无限占用
                    if statement_timeout_ms > 0 {
                        for sql in session_timeouts(statement_timeout_ms) {
                            sqlx::query(&sql).execute(&mut *conn).await?;
                        }
                    }
                    Ok(())
                })
            })
            .connect(&config.url)
            .await?;

        info!("数据库连接池已创建");

        Ok(Self { pool })
    }

    /// 获取连接池引用
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(SharedError::from)
    }

    /// 关闭连接池
    pub async fn close(&self) {
        self.pool.close().await;
        info!("数据库连接池已关闭");
    }

    /// 执行工作区根目录 migrations/ 下的迁移脚本
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("正在执行数据库迁移...");
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("数据库迁移完成");
        Ok(())
    }
}

/// 每个新连接上执行的会话超时设置
fn session_timeouts(timeout_ms: u64) -> [String; 2] {
    [
        format!("SET statement_timeout = {timeout_ms}"),
        format!("SET lock_timeout = {timeout_ms}"),
    ]
}

impl std::ops::Deref for Database {
    type Target = PgPool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}
