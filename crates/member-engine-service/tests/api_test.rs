//! HTTP 接口集成测试
//!
//! 直接对 Router 发起请求，不监听端口

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::{Harness, auto_policy};
use http_body_util::BodyExt;
use member_engine::api::build_router;
use member_engine::models::ActionType;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn check_in(key: &str) -> Value {
    json!({
        "businessId": "biz-api",
        "programId": "program-1",
        "customerId": "cust-1",
        "type": "check_in",
        "payload": {},
        "idempotencyKey": key
    })
}

#[tokio::test]
async fn test_health_check() {
    let app = build_router(Harness::new().state);
    let (status, body) = call(&app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_submit_request_and_duplicate() {
    let h = Harness::new();
    h.put_policy(auto_policy("biz-api", ActionType::CheckIn, 10)).await;
    let app = build_router(h.state.clone());

    let (status, first) = call(&app, Method::POST, "/api/v1/requests", Some(check_in("k-1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["success"], true);
    assert_eq!(first["data"]["status"], "auto_approved");

    let (_, second) = call(&app, Method::POST, "/api/v1/requests", Some(check_in("k-1"))).await;
    assert_eq!(first, second);

    let (status, ledger) = call(&app, Method::GET, "/api/v1/ledger/biz-api/cust-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ledger["data"]["balance"], 10);
    assert_eq!(ledger["data"]["entries"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_submit_unknown_type_is_bad_request() {
    let app = build_router(Harness::new().state);
    let mut body = check_in("k-1");
    body["type"] = json!("teleport");

    let (status, response) = call(&app, Method::POST, "/api/v1/requests", Some(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["success"], false);
    assert_eq!(response["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_pending_review_flow() {
    let app = build_router(Harness::new().state);

    // 未配置策略，进入人工审核
    let (_, submitted) = call(&app, Method::POST, "/api/v1/requests", Some(check_in("k-9"))).await;
    assert_eq!(submitted["data"]["status"], "pending");
    let id = submitted["data"]["requestId"].as_str().unwrap().to_string();

    let (_, pending) = call(
        &app,
        Method::GET,
        "/api/v1/requests/pending?businessId=biz-api",
        None,
    )
    .await;
    assert_eq!(pending["data"].as_array().unwrap().len(), 1);
    assert_eq!(pending["data"][0]["decisionReason"], "policy_missing");

    let review = json!({"approve": false, "staffId": "staff-1", "note": "重复签到"});
    let uri = format!("/api/v1/requests/{id}/review");
    let (status, reviewed) = call(&app, Method::POST, &uri, Some(review.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reviewed["data"]["status"], "rejected");

    let (status, again) = call(&app, Method::POST, &uri, Some(review)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(again["code"], "INVALID_STATUS_TRANSITION");
}

#[tokio::test]
async fn test_unknown_request_is_not_found() {
    let app = build_router(Harness::new().state);
    let uri = format!("/api/v1/requests/{}", uuid::Uuid::now_v7());

    let (status, body) = call(&app, Method::GET, &uri, None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "REQUEST_NOT_FOUND");
}

#[tokio::test]
async fn test_policy_upsert_and_list() {
    let app = build_router(Harness::new().state);
    let policy = json!({
        "businessId": "biz-api",
        "actionType": "earn_points",
        "enabled": true,
        "autoApprove": true,
        "maxPerDay": 3
    });

    let (status, _) = call(&app, Method::PUT, "/api/v1/policies", Some(policy)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, listed) = call(&app, Method::GET, "/api/v1/policies?businessId=biz-api", None).await;
    let policies = listed["data"].as_array().unwrap();
    assert_eq!(policies.len(), 1);
    assert_eq!(policies[0]["maxPerDay"], 3);

    let invalid = json!({
        "businessId": "biz-api",
        "actionType": "earn_points",
        "enabled": true,
        "autoApprove": true,
        "maxPerDay": -1
    });
    let (status, _) = call(&app, Method::PUT, "/api/v1/policies", Some(invalid)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_automation_lifecycle_over_http() {
    let app = build_router(Harness::new().state);
    let draft = json!({
        "businessId": "biz-api",
        "name": "注册送积分",
        "triggerType": "pass.created",
        "templateId": "tpl-1",
        "actions": [{"type": "add_points", "config": {"points": 100}}]
    });

    let (status, created) = call(&app, Method::POST, "/api/v1/automations", Some(draft)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["data"]["status"], "draft");
    let id = created["data"]["id"].as_str().unwrap().to_string();

    // 草稿不能直接暂停
    let (status, _) = call(&app, Method::POST, &format!("/api/v1/automations/{id}/pause"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, published) =
        call(&app, Method::POST, &format!("/api/v1/automations/{id}/publish"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(published["data"]["status"], "published");

    let event = json!({
        "eventId": "evt-http-1",
        "eventType": "pass.created",
        "businessId": "biz-api",
        "templateId": "tpl-1",
        "customerId": "cust-7"
    });
    let (status, executed) = call(&app, Method::POST, "/api/v1/events", Some(event)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(executed["data"].as_array().unwrap().len(), 1);

    let (_, executions) = call(
        &app,
        Method::GET,
        &format!("/api/v1/automations/{id}/executions?limit=10"),
        None,
    )
    .await;
    let executions = executions["data"].as_array().unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0]["outcomes"][0]["outcome"], "succeeded");

    let (_, ledger) = call(&app, Method::GET, "/api/v1/ledger/biz-api/cust-7", None).await;
    assert_eq!(ledger["data"]["balance"], 100);

    let (status, archived) = call(&app, Method::DELETE, &format!("/api/v1/automations/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(archived["data"]["status"], "archived");

    let (_, listed) = call(
        &app,
        Method::GET,
        "/api/v1/automations?businessId=biz-api&status=published",
        None,
    )
    .await;
    assert!(listed["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_automation_is_not_found() {
    let app = build_router(Harness::new().state);
    let uri = format!("/api/v1/automations/{}", uuid::Uuid::now_v7());

    let (status, body) = call(&app, Method::GET, &uri, None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "AUTOMATION_NOT_FOUND");
}

#[tokio::test]
async fn test_automation_without_actions_is_rejected() {
    let app = build_router(Harness::new().state);
    let draft = json!({
        "businessId": "biz-api",
        "name": "空自动化",
        "triggerType": "scan.performed",
        "templateId": "tpl-1",
        "actions": []
    });

    let (status, body) = call(&app, Method::POST, "/api/v1/automations", Some(draft)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}
