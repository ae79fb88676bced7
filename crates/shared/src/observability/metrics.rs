//! Prometheus 指标模块
//!
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{Result, SharedError};

/// 持有指标服务器任务
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 安装 Prometheus recorder 并在 `port` 上暴露 `/metrics` 与 `/health`
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| SharedError::Observability(e.to_string()))?;

    register_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle)
        .await
        .map_err(|e| SharedError::Observability(format!("指标端口绑定失败: {e}")))?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

fn register_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    metrics::describe_counter!(
        "member_requests_total",
        "Member action requests by type and decided status"
    );
    metrics::describe_counter!("ledger_credits_total", "Ledger credit calls by outcome");
    metrics::describe_counter!(
        "automation_executions_total",
        "Automation executions by trigger and match result"
    );
    metrics::describe_histogram!(
        "automation_execution_duration_seconds",
        "Automation execution duration in seconds"
    );
    metrics::describe_counter!(
        "automation_action_outcomes_total",
        "Automation action outcomes by action type"
    );
    metrics::describe_counter!(
        "dispatch_attempts_total",
        "Notification dispatcher call attempts by operation and outcome"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "指标服务已监听");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "指标服务异常退出");
        }
    }))
}

// ============================================================================
// 指标记录函数
// ============================================================================

#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录会员行为请求的判定结果
#[inline]
pub fn record_member_request(action_type: &str, status: &str) {
    metrics::counter!(
        "member_requests_total",
        "type" => action_type.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// outcome: applied / duplicate / insufficient_balance / failed
#[inline]
pub fn record_ledger_credit(outcome: &'static str) {
    metrics::counter!("ledger_credits_total", "outcome" => outcome).increment(1);
}

#[inline]
pub fn record_automation_execution(trigger: &str, matched: bool, duration_secs: f64) {
    metrics::counter!(
        "automation_executions_total",
        "trigger" => trigger.to_string(),
        "matched" => matched.to_string()
    )
    .increment(1);

    if matched {
        metrics::histogram!(
            "automation_execution_duration_seconds",
            "trigger" => trigger.to_string()
        )
        .record(duration_secs);
    }
}

#[inline]
pub fn record_action_outcome(action: &str, succeeded: bool) {
    metrics::counter!(
        "automation_action_outcomes_total",
        "action" => action.to_string(),
        "outcome" => if succeeded { "succeeded" } else { "failed" }
    )
    .increment(1);
}

/// outcome: ok / error / timeout
#[inline]
pub fn record_dispatch_attempt(operation: &str, outcome: &'static str) {
    metrics::counter!(
        "dispatch_attempts_total",
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
