//! 事件直接投递接口，与 Kafka 消费走同一执行路径

use axum::Json;
use axum::extract::State;
use member_shared::events::DomainEvent;

use crate::api::dto::ApiResponse;
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::models::ExecutionRecord;

/// 返回本次新产生的执行记录，重投的事件返回空列表
///
/// POST /api/v1/events
pub async fn ingest_event(
    State(state): State<AppState>,
    Json(event): Json<DomainEvent>,
) -> Result<Json<ApiResponse<Vec<ExecutionRecord>>>, ApiError> {
    let records = state.engine.on_event(&event).await?;
    Ok(Json(ApiResponse::success(records)))
}
