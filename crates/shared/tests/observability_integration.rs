//! 可观测性模块集成测试
//!
//! 指标函数在未安装 recorder 时为空操作，这里只验证调用不会 panic；
//! 中间件测试验证请求 ID 的透传与生成。

mod metrics_tests {
    use member_shared::observability::metrics::{
        record_action_outcome, record_automation_execution, record_dispatch_attempt,
        record_http_request, record_ledger_credit, record_member_request,
    };

    #[test]
    fn test_record_http_request() {
        record_http_request("GET", "/api/v1/requests/pending", 200, 0.05);
        record_http_request("POST", "/api/v1/requests", 200, 0.12);
        record_http_request("POST", "/api/v1/automations/x/publish", 409, 0.01);
        record_http_request("GET", "/api/v1/automations/x", 404, 0.01);
    }

    #[test]
    fn test_record_member_and_ledger() {
        record_member_request("check_in", "auto_approved");
        record_member_request("earn_points", "pending");
        record_member_request("ticket_use", "rejected");
        record_ledger_credit("applied");
        record_ledger_credit("duplicate");
        record_ledger_credit("insufficient_balance");
    }

    #[test]
    fn test_record_automation_metrics() {
        record_automation_execution("pass.created", true, 0.03);
        record_automation_execution("scan.performed", false, 0.001);
        record_action_outcome("add_points", true);
        record_action_outcome("send_push_notification", false);
        record_dispatch_attempt("send_field_update", "ok");
        record_dispatch_attempt("send_email", "timeout");
    }

    #[test]
    fn test_metrics_with_edge_cases() {
        record_http_request("", "", 0, 0.0);

        let long_path = "/api/".to_string() + &"x".repeat(1000);
        record_http_request("GET", &long_path, 200, 0.01);

        record_automation_execution("", true, 999.99);
    }
}

mod middleware_tests {
    use axum::Router;
    use axum::body::Body;
    use axum::extract::Extension;
    use axum::http::{Request, StatusCode};
    use axum::middleware;
    use axum::routing::get;
    use member_shared::observability::middleware::{RequestId, http_tracing};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/echo",
                get(|Extension(id): Extension<RequestId>| async move { id.as_str().to_string() }),
            )
            .layer(middleware::from_fn(http_tracing))
    }

    #[tokio::test]
    async fn test_request_id_passthrough() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/echo")
                    .header("x-request-id", "req-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-request-id"], "req-123");
    }

    #[tokio::test]
    async fn test_request_id_generated_when_missing() {
        let response = app()
            .oneshot(Request::builder().uri("/echo").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let id = response.headers()["x-request-id"].to_str().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_route_still_tagged() {
        let response = app()
            .oneshot(Request::builder().uri("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key("x-request-id"));
    }
}
