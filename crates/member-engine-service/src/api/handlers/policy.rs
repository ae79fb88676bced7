//! 审批策略维护接口（运营工具使用）

use axum::Json;
use axum::extract::{Query, State};
use chrono::Utc;
use tracing::info;
use validator::Validate;

use crate::api::dto::{ApiResponse, BusinessQuery};
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::models::ActionPolicy;

/// 写入策略，同时失效该键的缓存
///
/// PUT /api/v1/policies
pub async fn upsert_policy(
    State(state): State<AppState>,
    Json(mut policy): Json<ActionPolicy>,
) -> Result<Json<ApiResponse<ActionPolicy>>, ApiError> {
    policy.validate()?;
    policy.updated_at = Utc::now();
    state.policies.upsert(&policy).await?;

    info!(
        business_id = %policy.business_id,
        action_type = %policy.action_type,
        "策略已更新"
    );
    Ok(Json(ApiResponse::success(policy)))
}

/// GET /api/v1/policies?businessId=
pub async fn list_policies(
    State(state): State<AppState>,
    Query(query): Query<BusinessQuery>,
) -> Result<Json<ApiResponse<Vec<ActionPolicy>>>, ApiError> {
    let policies = state.policies.list(&query.business_id).await?;
    Ok(Json(ApiResponse::success(policies)))
}
