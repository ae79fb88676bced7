//! 会员引擎服务
//!
//! 提供会员请求、策略、账本、自动化的 REST API，并消费通行证生命周期事件。

use std::sync::Arc;
use std::time::Duration;

use member_engine::api::{AppState, build_router};
use member_engine::consumer::EventConsumer;
use member_engine::lock::{LockConfig, LockManager};
use member_engine::notification::HttpNotificationDispatcher;
use member_engine::repository::{MemoryStore, Repositories};
use member_shared::config::{AppConfig, StorageBackend};
use member_shared::database::Database;
use member_shared::observability;
use axum::http::HeaderValue;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "member-engine-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load(SERVICE_NAME)?;
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!(
        environment = %config.environment,
        storage = ?config.engine.storage,
        "Starting {} on {}",
        SERVICE_NAME,
        config.server_addr()
    );

    let (repos, database) = match config.engine.storage {
        StorageBackend::Postgres => {
            let db = Database::connect(&config.database).await?;
            db.run_migrations().await?;
            (Repositories::postgres(db.pool().clone()), Some(db))
        }
        StorageBackend::Memory => {
            warn!("使用内存存储，数据不会跨重启保留");
            (Repositories::memory(Arc::new(MemoryStore::new())), None)
        }
    };

    // 未配置 Redis 时锁退化为进程内锁，只适合单实例部署
    let redis_client = match &config.redis.url {
        Some(url) => Some(redis::Client::open(url.as_str())?),
        None => {
            warn!("未配置 Redis，使用进程内锁");
            None
        }
    };
    let locks = Arc::new(LockManager::new(
        redis_client,
        LockConfig::from(&config.engine),
    ));

    let dispatcher = Arc::new(HttpNotificationDispatcher::new(
        config.engine.dispatcher_base_url.clone(),
        Duration::from_millis(config.engine.dispatch_timeout_ms),
    )?);

    let state = AppState::build(repos, locks, dispatcher, &config.engine);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_handle = if config.kafka.enabled {
        let consumer = EventConsumer::new(&config.kafka, state.engine.clone())?;
        Some(tokio::spawn(async move {
            if let Err(e) = consumer.run(shutdown_rx).await {
                error!(error = %e, "事件消费者异常退出");
            }
        }))
    } else {
        info!("Kafka 未启用，仅接受 HTTP 事件投递");
        None
    };

    let app = build_router(state).layer(cors_layer(config.is_production()));
    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 通知消费者退出并等待在途消息处理完
    let _ = shutdown_tx.send(true);
    if let Some(handle) = consumer_handle
        && let Err(e) = handle.await
    {
        error!(error = %e, "等待事件消费者退出失败");
    }

    if let Some(db) = database {
        db.close().await;
    }

    info!("Server shutdown complete");
    Ok(())
}

/// 监听 Ctrl+C 与 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("注册 Ctrl+C 处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("注册 SIGTERM 处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

/// 运营后台跨域配置，`MEMBER_CORS_ORIGINS` 为逗号分隔的域名列表
fn cors_layer(production: bool) -> CorsLayer {
    let allowed_origins = std::env::var("MEMBER_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3001,http://localhost:5173".to_string());

    if allowed_origins == "*" {
        if production {
            warn!("MEMBER_CORS_ORIGINS=\"*\" 在生产环境中不安全，请设置为具体域名");
        }
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    info!("CORS allowed_origins: {}", allowed_origins);
    let origins: Vec<_> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
