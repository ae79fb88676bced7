//! 积分账本查询接口

use axum::Json;
use axum::extract::{Path, Query, State};

use crate::api::dto::{ApiResponse, LedgerView, LimitQuery};
use crate::api::error::ApiError;
use crate::api::state::AppState;

const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// 余额与最近流水
///
/// GET /api/v1/ledger/{businessId}/{customerId}?limit=
pub async fn get_ledger(
    State(state): State<AppState>,
    Path((business_id, customer_id)): Path<(String, String)>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ApiResponse<LedgerView>>, ApiError> {
    let balance = state.ledger.balance(&business_id, &customer_id).await?;
    let entries = state
        .ledger
        .history(&business_id, &customer_id, query.limit_or(DEFAULT_HISTORY_LIMIT))
        .await?;

    Ok(Json(ApiResponse::success(LedgerView {
        business_id,
        customer_id,
        balance,
        entries,
    })))
}
