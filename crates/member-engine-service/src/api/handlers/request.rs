//! 会员请求接口

use axum::Json;
use axum::extract::{Path, Query, State};
use uuid::Uuid;

use crate::api::dto::{ApiResponse, BusinessQuery, ReviewRequest};
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::models::{MemberActionRequest, NewActionRequest, SubmitOutcome};

/// 提交会员请求
///
/// POST /api/v1/requests
///
/// 重复的幂等键返回首次结果，响应与首次完全一致
pub async fn submit_request(
    State(state): State<AppState>,
    Json(body): Json<NewActionRequest>,
) -> Result<Json<ApiResponse<SubmitOutcome>>, ApiError> {
    let outcome = state.requests.submit(body).await?;
    let message = outcome.message.clone();
    Ok(Json(ApiResponse::success_with_message(outcome, message)))
}

/// GET /api/v1/requests/{id}
pub async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<MemberActionRequest>>, ApiError> {
    let request = state.requests.get(id).await?;
    Ok(Json(ApiResponse::success(request)))
}

/// 待审核列表
///
/// GET /api/v1/requests/pending?businessId=
pub async fn list_pending(
    State(state): State<AppState>,
    Query(query): Query<BusinessQuery>,
) -> Result<Json<ApiResponse<Vec<MemberActionRequest>>>, ApiError> {
    let pending = state.requests.list_pending(&query.business_id).await?;
    Ok(Json(ApiResponse::success(pending)))
}

/// 人工审核
///
/// POST /api/v1/requests/{id}/review
pub async fn review_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReviewRequest>,
) -> Result<Json<ApiResponse<MemberActionRequest>>, ApiError> {
    let request = state
        .requests
        .review(id, body.approve, &body.staff_id, body.note)
        .await?;
    Ok(Json(ApiResponse::success(request)))
}
