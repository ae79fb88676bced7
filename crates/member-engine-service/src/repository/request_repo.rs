//! 会员请求仓储
//!
//! 幂等由 `(business_id, idempotency_key)` 唯一约束兜底，插入冲突时返回 false

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::{DecisionUpdate, RequestRepositoryTrait};
use crate::error::{EngineError, Result};
use crate::models::{
    ActionPayload, ActionType, DecisionReason, MemberActionRequest, RequestStatus,
};

const SELECT_COLUMNS: &str = r#"
    SELECT id, business_id, program_id, customer_id, action_type, payload, idempotency_key,
           status, decision_reason, review_note, created_at, decided_at, decided_by
    FROM member_action_requests
"#;

#[derive(sqlx::FromRow)]
struct RequestRow {
    id: Uuid,
    business_id: String,
    program_id: String,
    customer_id: String,
    action_type: ActionType,
    payload: serde_json::Value,
    idempotency_key: String,
    status: RequestStatus,
    decision_reason: Option<DecisionReason>,
    review_note: Option<String>,
    created_at: DateTime<Utc>,
    decided_at: Option<DateTime<Utc>>,
    decided_by: Option<String>,
}

impl TryFrom<RequestRow> for MemberActionRequest {
    type Error = EngineError;

    fn try_from(row: RequestRow) -> Result<Self> {
        let payload = ActionPayload::parse(row.action_type, &row.payload)
            .map_err(|e| EngineError::Internal(format!("请求 {} 负载损坏: {e}", row.id)))?;
        Ok(Self {
            id: row.id,
            business_id: row.business_id,
            program_id: row.program_id,
            customer_id: row.customer_id,
            action_type: row.action_type,
            payload,
            idempotency_key: row.idempotency_key,
            status: row.status,
            decision_reason: row.decision_reason,
            review_note: row.review_note,
            created_at: row.created_at,
            decided_at: row.decided_at,
            decided_by: row.decided_by,
        })
    }
}

pub struct RequestRepository {
    pool: PgPool,
}

impl RequestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RequestRepositoryTrait for RequestRepository {
    async fn find_by_idempotency_key(
        &self,
        business_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<MemberActionRequest>> {
        let sql = format!("{SELECT_COLUMNS} WHERE business_id = $1 AND idempotency_key = $2");
        sqlx::query_as::<_, RequestRow>(&sql)
            .bind(business_id)
            .bind(idempotency_key)
            .fetch_optional(&self.pool)
            .await?
            .map(MemberActionRequest::try_from)
            .transpose()
    }

    async fn get(&self, id: Uuid) -> Result<Option<MemberActionRequest>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = $1");
        sqlx::query_as::<_, RequestRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(MemberActionRequest::try_from)
            .transpose()
    }

    async fn insert(&self, request: &MemberActionRequest) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO member_action_requests
                (id, business_id, program_id, customer_id, action_type, payload,
                 idempotency_key, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (business_id, idempotency_key) DO NOTHING
            "#,
        )
        .bind(request.id)
        .bind(&request.business_id)
        .bind(&request.program_id)
        .bind(&request.customer_id)
        .bind(request.action_type)
        .bind(request.payload.to_value())
        .bind(&request.idempotency_key)
        .bind(request.status)
        .bind(request.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_decision(&self, id: Uuid, update: &DecisionUpdate) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE member_action_requests
            SET status = $2, decision_reason = $3, decided_at = $4, decided_by = $5, review_note = $6
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.status)
        .bind(update.reason)
        .bind(update.decided_at)
        .bind(&update.decided_by)
        .bind(&update.review_note)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::RequestNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn count_approved_since(
        &self,
        business_id: &str,
        customer_id: &str,
        action_type: ActionType,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM member_action_requests
            WHERE business_id = $1 AND customer_id = $2 AND action_type = $3
              AND status IN ('approved', 'auto_approved')
              AND created_at >= $4
            "#,
        )
        .bind(business_id)
        .bind(customer_id)
        .bind(action_type)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn latest_request_before(
        &self,
        business_id: &str,
        customer_id: &str,
        action_type: ActionType,
        created_at: DateTime<Utc>,
        id: Uuid,
    ) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT MAX(created_at)
            FROM member_action_requests
            WHERE business_id = $1 AND customer_id = $2 AND action_type = $3
              AND status <> 'rejected' AND id <> $5 AND (created_at, id) < ($4, $5)
            "#,
        )
        .bind(business_id)
        .bind(customer_id)
        .bind(action_type)
        .bind(created_at)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(latest)
    }

    async fn list_pending(&self, business_id: &str, limit: i64) -> Result<Vec<MemberActionRequest>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE business_id = $1 AND status = 'pending' ORDER BY created_at LIMIT $2"
        );
        sqlx::query_as::<_, RequestRow>(&sql)
            .bind(business_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(MemberActionRequest::try_from)
            .collect()
    }
}
