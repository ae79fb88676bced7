//! 统一可观测性模块
//!
//! 提供日志、分布式追踪和 Prometheus 指标的统一初始化。

pub mod metrics;
pub mod middleware;
pub mod tracing;

use ::tracing::info;

use crate::config::ObservabilityConfig;
use crate::error::Result;

/// 可观测性资源守卫
///
/// Drop 时关闭追踪 provider 并刷新待发送的 span。
pub struct ObservabilityGuard {
    _metrics_handle: Option<metrics::MetricsHandle>,
    _tracing_guard: Option<tracing::TracingGuard>,
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        info!("正在关闭可观测性组件...");
    }
}

/// 统一初始化可观测性
///
/// 先初始化 tracing，保证后续 metrics 初始化过程中的日志可见。
pub async fn init(service_name: &str, config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    let tracing_guard = tracing::init(service_name, config)?;

    let metrics_handle = if config.metrics_enabled {
        Some(metrics::init(service_name, config.metrics_port).await?)
    } else {
        None
    };

    info!(
        service = %service_name,
        metrics_enabled = config.metrics_enabled,
        metrics_port = config.metrics_port,
        otlp_endpoint = ?config.otlp_endpoint,
        "可观测性初始化完成"
    );

    Ok(ObservabilityGuard {
        _metrics_handle: metrics_handle,
        _tracing_guard: Some(tracing_guard),
    })
}
