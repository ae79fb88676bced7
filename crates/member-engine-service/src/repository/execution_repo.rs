//! 执行记录仓储（只追加）

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use member_shared::events::EventType;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::ExecutionRepositoryTrait;
use crate::error::{EngineError, Result};
use crate::models::ExecutionRecord;

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: Uuid,
    automation_id: Uuid,
    business_id: String,
    event_id: String,
    event_type: String,
    customer_id: String,
    event_context: serde_json::Value,
    matched: bool,
    outcomes: serde_json::Value,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl TryFrom<ExecutionRow> for ExecutionRecord {
    type Error = EngineError;

    fn try_from(row: ExecutionRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            automation_id: row.automation_id,
            business_id: row.business_id,
            event_id: row.event_id,
            event_type: row
                .event_type
                .parse::<EventType>()
                .map_err(EngineError::Internal)?,
            customer_id: row.customer_id,
            event_context: row.event_context,
            matched: row.matched,
            outcomes: serde_json::from_value(row.outcomes)?,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

pub struct ExecutionRepository {
    pool: PgPool,
}

impl ExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionRepositoryTrait for ExecutionRepository {
    async fn exists(&self, automation_id: Uuid, event_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM automation_executions WHERE automation_id = $1 AND event_id = $2
            )
            "#,
        )
        .bind(automation_id)
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn insert(&self, record: &ExecutionRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO automation_executions
                (id, automation_id, business_id, event_id, event_type, customer_id,
                 event_context, matched, outcomes, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (automation_id, event_id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.automation_id)
        .bind(&record.business_id)
        .bind(&record.event_id)
        .bind(record.event_type.as_str())
        .bind(&record.customer_id)
        .bind(&record.event_context)
        .bind(record.matched)
        .bind(serde_json::to_value(&record.outcomes)?)
        .bind(record.started_at)
        .bind(record.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_by_automation(
        &self,
        automation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ExecutionRecord>> {
        sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT id, automation_id, business_id, event_id, event_type, customer_id,
                   event_context, matched, outcomes, started_at, finished_at
            FROM automation_executions
            WHERE automation_id = $1
            ORDER BY started_at DESC
            LIMIT $2
            "#,
        )
        .bind(automation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(ExecutionRecord::try_from)
        .collect()
    }
}
