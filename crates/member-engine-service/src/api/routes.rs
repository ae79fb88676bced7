//! 路由配置

use axum::routing::{get, post, put};
use axum::{Json, Router, middleware};
use member_shared::observability::middleware::http_tracing;

use super::handlers;
use super::state::AppState;

fn request_routes() -> Router<AppState> {
    Router::new()
        .route("/requests", post(handlers::request::submit_request))
        .route("/requests/pending", get(handlers::request::list_pending))
        .route("/requests/{id}", get(handlers::request::get_request))
        .route(
            "/requests/{id}/review",
            post(handlers::request::review_request),
        )
        .route(
            "/ledger/{business_id}/{customer_id}",
            get(handlers::ledger::get_ledger),
        )
}

fn policy_routes() -> Router<AppState> {
    Router::new().route(
        "/policies",
        put(handlers::policy::upsert_policy).get(handlers::policy::list_policies),
    )
}

fn automation_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/automations",
            post(handlers::automation::create_automation)
                .get(handlers::automation::list_automations),
        )
        .route(
            "/automations/{id}",
            get(handlers::automation::get_automation)
                .put(handlers::automation::update_automation)
                .delete(handlers::automation::delete_automation),
        )
        .route(
            "/automations/{id}/publish",
            post(handlers::automation::publish_automation),
        )
        .route(
            "/automations/{id}/pause",
            post(handlers::automation::pause_automation),
        )
        .route(
            "/automations/{id}/executions",
            get(handlers::automation::list_executions),
        )
        .route("/events", post(handlers::event::ingest_event))
}

/// 全部业务路由（不含前缀）
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(request_routes())
        .merge(policy_routes())
        .merge(automation_routes())
}

/// 挂载 `/api/v1` 前缀、健康检查与追踪中间件
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes())
        .route("/health", get(health_check))
        .layer(middleware::from_fn(http_tracing))
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "member-engine-service"
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_construction() {
        let _requests = request_routes();
        let _policies = policy_routes();
        let _automations = automation_routes();
        let _api = api_routes();
    }
}
