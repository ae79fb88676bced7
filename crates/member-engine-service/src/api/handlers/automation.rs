//! 自动化管理接口
//!
//! 删除即归档，执行历史始终保留

use axum::Json;
use axum::extract::{Path, Query, State};
use uuid::Uuid;

use crate::api::dto::{ApiResponse, AutomationListQuery, LimitQuery};
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::models::{Automation, AutomationDraft, ExecutionRecord};

const DEFAULT_EXECUTION_LIMIT: i64 = 50;

/// POST /api/v1/automations
pub async fn create_automation(
    State(state): State<AppState>,
    Json(draft): Json<AutomationDraft>,
) -> Result<Json<ApiResponse<Automation>>, ApiError> {
    let automation = state.automations.create(draft).await?;
    Ok(Json(ApiResponse::success(automation)))
}

/// GET /api/v1/automations?businessId=&status=
pub async fn list_automations(
    State(state): State<AppState>,
    Query(query): Query<AutomationListQuery>,
) -> Result<Json<ApiResponse<Vec<Automation>>>, ApiError> {
    let automations = state
        .automations
        .list(&query.business_id, query.status)
        .await?;
    Ok(Json(ApiResponse::success(automations)))
}

/// GET /api/v1/automations/{id}
pub async fn get_automation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Automation>>, ApiError> {
    let automation = state.automations.get(id).await?;
    Ok(Json(ApiResponse::success(automation)))
}

/// PUT /api/v1/automations/{id}
pub async fn update_automation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(draft): Json<AutomationDraft>,
) -> Result<Json<ApiResponse<Automation>>, ApiError> {
    let automation = state.automations.update(id, draft).await?;
    Ok(Json(ApiResponse::success(automation)))
}

/// DELETE /api/v1/automations/{id}
pub async fn delete_automation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Automation>>, ApiError> {
    let automation = state.automations.archive(id).await?;
    Ok(Json(ApiResponse::success_with_message(automation, "已归档")))
}

/// POST /api/v1/automations/{id}/publish
pub async fn publish_automation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Automation>>, ApiError> {
    let automation = state.automations.publish(id).await?;
    Ok(Json(ApiResponse::success(automation)))
}

/// POST /api/v1/automations/{id}/pause
pub async fn pause_automation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Automation>>, ApiError> {
    let automation = state.automations.pause(id).await?;
    Ok(Json(ApiResponse::success(automation)))
}

/// 执行日志，按开始时间倒序
///
/// GET /api/v1/automations/{id}/executions?limit=
pub async fn list_executions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ApiResponse<Vec<ExecutionRecord>>>, ApiError> {
    let records = state
        .automations
        .executions(id, query.limit_or(DEFAULT_EXECUTION_LIMIT))
        .await?;
    Ok(Json(ApiResponse::success(records)))
}
