//! 会员请求受理与审批流程集成测试

mod common;

use std::sync::Arc;

use common::{Harness, auto_policy, submission};
use futures::future::join_all;
use member_engine::error::EngineError;
use member_engine::models::{ActionType, DecisionReason, RequestStatus};
use member_shared::test_utils::{test_business_id, test_customer_id};
use serde_json::json;

#[tokio::test]
async fn test_check_in_auto_approved_credits_points() {
    let h = Harness::new();
    let biz = test_business_id();
    let cust = test_customer_id();
    h.put_policy(auto_policy(&biz, ActionType::CheckIn, 10)).await;

    let outcome = h
        .state
        .requests
        .submit(submission(&biz, &cust, "check_in", json!({}), "A"))
        .await
        .unwrap();

    assert_eq!(outcome.status, RequestStatus::AutoApproved);
    assert_eq!(h.balance(&biz, &cust).await, 10);
}

#[tokio::test]
async fn test_resubmission_returns_original_outcome() {
    let h = Harness::new();
    let biz = test_business_id();
    let cust = test_customer_id();
    h.put_policy(auto_policy(&biz, ActionType::CheckIn, 10)).await;

    let first = h
        .state
        .requests
        .submit(submission(&biz, &cust, "check_in", json!({}), "A"))
        .await
        .unwrap();
    let second = h
        .state
        .requests
        .submit(submission(&biz, &cust, "check_in", json!({}), "A"))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(h.balance(&biz, &cust).await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resubmission_has_single_effect() {
    let h = Arc::new(Harness::new());
    let biz = test_business_id();
    let cust = test_customer_id();
    h.put_policy(auto_policy(&biz, ActionType::CheckIn, 10)).await;

    let tasks = (0..8).map(|_| {
        let h = h.clone();
        let sub = submission(&biz, &cust, "check_in", json!({}), "A");
        tokio::spawn(async move { h.state.requests.submit(sub).await })
    });
    let outcomes: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert!(outcomes.iter().all(|o| *o == outcomes[0]));
    assert_eq!(outcomes[0].status, RequestStatus::AutoApproved);
    assert_eq!(h.balance(&biz, &cust).await, 10);
}

#[tokio::test]
async fn test_daily_cap_routes_fourth_request_to_pending() {
    let h = Harness::new();
    let biz = test_business_id();
    let cust = test_customer_id();
    let mut policy = auto_policy(&biz, ActionType::EarnPoints, 0);
    policy.max_per_day = Some(3);
    h.put_policy(policy).await;

    let mut outcomes = Vec::new();
    for i in 0..4 {
        let key = format!("earn-{i}");
        outcomes.push(
            h.state
                .requests
                .submit(submission(&biz, &cust, "earn_points", json!({"points": 5}), &key))
                .await
                .unwrap(),
        );
    }

    let statuses: Vec<_> = outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![
            RequestStatus::AutoApproved,
            RequestStatus::AutoApproved,
            RequestStatus::AutoApproved,
            RequestStatus::Pending,
        ]
    );

    let fourth = h.state.requests.get(outcomes[3].request_id).await.unwrap();
    assert_eq!(fourth.decision_reason, Some(DecisionReason::DailyCapReached));
    assert_eq!(h.balance(&biz, &cust).await, 15);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_respect_daily_cap() {
    let h = Arc::new(Harness::new());
    let biz = test_business_id();
    let cust = test_customer_id();
    let mut policy = auto_policy(&biz, ActionType::EarnPoints, 0);
    policy.max_per_day = Some(2);
    h.put_policy(policy).await;

    let tasks = (0..6).map(|i| {
        let h = h.clone();
        let sub = submission(&biz, &cust, "earn_points", json!({"points": 1}), &format!("k-{i}"));
        tokio::spawn(async move { h.state.requests.submit(sub).await })
    });
    let approved = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .filter(|o| o.status == RequestStatus::AutoApproved)
        .count();

    assert_eq!(approved, 2);
    assert_eq!(h.balance(&biz, &cust).await, 2);
}

#[tokio::test]
async fn test_cooldown_holds_second_check_in() {
    let h = Harness::new();
    let biz = test_business_id();
    let cust = test_customer_id();
    let mut policy = auto_policy(&biz, ActionType::CheckIn, 10);
    policy.cooldown_minutes = Some(60);
    h.put_policy(policy).await;

    let first = h
        .state
        .requests
        .submit(submission(&biz, &cust, "check_in", json!({}), "c-1"))
        .await
        .unwrap();
    let second = h
        .state
        .requests
        .submit(submission(&biz, &cust, "check_in", json!({}), "c-2"))
        .await
        .unwrap();

    assert_eq!(first.status, RequestStatus::AutoApproved);
    assert_eq!(second.status, RequestStatus::Pending);
    let held = h.state.requests.get(second.request_id).await.unwrap();
    assert_eq!(held.decision_reason, Some(DecisionReason::CooldownActive));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_check_ins_under_cooldown_approve_exactly_one() {
    let h = Arc::new(Harness::new());
    let biz = test_business_id();
    let cust = test_customer_id();
    let mut policy = auto_policy(&biz, ActionType::CheckIn, 10);
    policy.cooldown_minutes = Some(60);
    h.put_policy(policy).await;

    let tasks = (0..4).map(|i| {
        let h = h.clone();
        let sub = submission(&biz, &cust, "check_in", json!({}), &format!("cc-{i}"));
        tokio::spawn(async move { h.state.requests.submit(sub).await })
    });
    let outcomes: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let approved = outcomes
        .iter()
        .filter(|o| o.status == RequestStatus::AutoApproved)
        .count();
    assert_eq!(approved, 1);
    for outcome in outcomes.iter().filter(|o| o.status != RequestStatus::AutoApproved) {
        let held = h.state.requests.get(outcome.request_id).await.unwrap();
        assert_eq!(held.decision_reason, Some(DecisionReason::CooldownActive));
    }
    assert_eq!(h.balance(&biz, &cust).await, 10);
}

#[tokio::test]
async fn test_disabled_policy_rejects() {
    let h = Harness::new();
    let biz = test_business_id();
    let cust = test_customer_id();
    let mut policy = auto_policy(&biz, ActionType::TicketUse, 0);
    policy.enabled = false;
    h.put_policy(policy).await;

    let outcome = h
        .state
        .requests
        .submit(submission(&biz, &cust, "ticket_use", json!({"ticket_id": "t-1"}), "t"))
        .await
        .unwrap();

    assert_eq!(outcome.status, RequestStatus::Rejected);
    let request = h.state.requests.get(outcome.request_id).await.unwrap();
    assert_eq!(request.decision_reason, Some(DecisionReason::PolicyDisabled));
    assert!(request.decided_at.is_some());
}

#[tokio::test]
async fn test_missing_policy_queues_for_review() {
    let h = Harness::new();
    let biz = test_business_id();

    let outcome = h
        .state
        .requests
        .submit(submission(&biz, "cust-1", "earn_points", json!({"points": 30}), "m"))
        .await
        .unwrap();

    assert_eq!(outcome.status, RequestStatus::Pending);
    let pending = h.state.requests.list_pending(&biz).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].decision_reason, Some(DecisionReason::PolicyMissing));
}

#[tokio::test]
async fn test_staff_approval_applies_effect_once() {
    let h = Harness::new();
    let biz = test_business_id();
    let cust = test_customer_id();
    let mut policy = auto_policy(&biz, ActionType::EarnPoints, 0);
    policy.requires_staff_review = true;
    h.put_policy(policy).await;

    let outcome = h
        .state
        .requests
        .submit(submission(&biz, &cust, "earn_points", json!({"points": 20}), "r"))
        .await
        .unwrap();
    assert_eq!(outcome.status, RequestStatus::Pending);
    assert_eq!(h.balance(&biz, &cust).await, 0);

    let approved = h
        .state
        .requests
        .review(outcome.request_id, true, "staff-7", Some("核实无误".to_string()))
        .await
        .unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);
    assert_eq!(approved.decided_by.as_deref(), Some("staff-7"));
    assert_eq!(h.balance(&biz, &cust).await, 20);

    let again = h
        .state
        .requests
        .review(outcome.request_id, true, "staff-7", None)
        .await;
    assert!(matches!(again, Err(EngineError::InvalidStatusTransition { .. })));
    assert_eq!(h.balance(&biz, &cust).await, 20);

    // 重复提交拿到审核后的状态
    let resubmitted = h
        .state
        .requests
        .submit(submission(&biz, &cust, "earn_points", json!({"points": 20}), "r"))
        .await
        .unwrap();
    assert_eq!(resubmitted.status, RequestStatus::Approved);
}

#[tokio::test]
async fn test_staff_rejection_has_no_effect() {
    let h = Harness::new();
    let biz = test_business_id();
    let cust = test_customer_id();
    let mut policy = auto_policy(&biz, ActionType::ReceiptCredit, 0);
    policy.auto_approve = false;
    h.put_policy(policy).await;

    let outcome = h
        .state
        .requests
        .submit(submission(
            &biz,
            &cust,
            "receipt_credit",
            json!({"receipt_id": "rc-1", "amount": 1200, "points": 12}),
            "rc",
        ))
        .await
        .unwrap();
    assert_eq!(outcome.status, RequestStatus::Pending);

    let rejected = h
        .state
        .requests
        .review(outcome.request_id, false, "staff-1", None)
        .await
        .unwrap();
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(rejected.decision_reason, Some(DecisionReason::StaffDecision));
    assert_eq!(h.balance(&biz, &cust).await, 0);
}

#[tokio::test]
async fn test_redeem_without_balance_waits_for_review() {
    let h = Harness::new();
    let biz = test_business_id();
    let cust = test_customer_id();
    h.put_policy(auto_policy(&biz, ActionType::RedeemOffer, 0)).await;

    let outcome = h
        .state
        .requests
        .submit(submission(
            &biz,
            &cust,
            "redeem_offer",
            json!({"offer_id": "coffee", "points_cost": 50}),
            "redeem-1",
        ))
        .await
        .unwrap();

    assert_eq!(outcome.status, RequestStatus::Pending);
    let request = h.state.requests.get(outcome.request_id).await.unwrap();
    assert_eq!(request.decision_reason, Some(DecisionReason::InsufficientBalance));
    assert_eq!(h.balance(&biz, &cust).await, 0);
}

#[tokio::test]
async fn test_redeem_debits_balance() {
    let h = Harness::new();
    let biz = test_business_id();
    let cust = test_customer_id();
    h.put_policy(auto_policy(&biz, ActionType::EarnPoints, 0)).await;
    h.put_policy(auto_policy(&biz, ActionType::RedeemOffer, 0)).await;

    h.state
        .requests
        .submit(submission(&biz, &cust, "earn_points", json!({"points": 80}), "e"))
        .await
        .unwrap();
    let outcome = h
        .state
        .requests
        .submit(submission(
            &biz,
            &cust,
            "redeem_offer",
            json!({"offer_id": "coffee", "points_cost": 50}),
            "redeem-2",
        ))
        .await
        .unwrap();

    assert_eq!(outcome.status, RequestStatus::AutoApproved);
    assert_eq!(h.balance(&biz, &cust).await, 30);

    let history = h.state.ledger.history(&biz, &cust, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history.iter().map(|e| e.delta).sum::<i64>(), 30);
}

#[tokio::test]
async fn test_invalid_submissions_are_not_persisted() {
    let h = Harness::new();
    let biz = test_business_id();

    let unknown = h
        .state
        .requests
        .submit(submission(&biz, "cust-1", "teleport", json!({}), "x"))
        .await;
    assert!(matches!(unknown, Err(EngineError::Validation(_))));

    let bad_payload = h
        .state
        .requests
        .submit(submission(&biz, "cust-1", "earn_points", json!({"points": "many"}), "y"))
        .await;
    assert!(matches!(bad_payload, Err(EngineError::Validation(_))));

    let empty_key = h
        .state
        .requests
        .submit(submission(&biz, "cust-1", "check_in", json!({}), ""))
        .await;
    assert!(matches!(empty_key, Err(EngineError::Validation(_))));

    assert!(h.state.requests.list_pending(&biz).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_oversized_points_are_rejected_before_the_ledger() {
    let h = Harness::new();
    let biz = test_business_id();
    let cust = test_customer_id();
    h.put_policy(auto_policy(&biz, ActionType::EarnPoints, 0)).await;

    h.state
        .requests
        .submit(submission(&biz, &cust, "earn_points", json!({"points": 1}), "small"))
        .await
        .unwrap();
    let huge = h
        .state
        .requests
        .submit(submission(&biz, &cust, "earn_points", json!({"points": i64::MAX}), "huge"))
        .await;

    assert!(matches!(huge, Err(EngineError::Validation(_))));
    assert_eq!(h.balance(&biz, &cust).await, 1);
    assert!(h.state.requests.list_pending(&biz).await.unwrap().is_empty());
}
