//! 自动化定义仓储
//!
//! 条件与动作以 JSONB 存储，读取时反序列化为强类型结构

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use member_shared::events::EventType;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::AutomationRepositoryTrait;
use crate::error::{EngineError, Result};
use crate::models::{Automation, AutomationStatus};

const SELECT_COLUMNS: &str = r#"
    SELECT id, business_id, name, description, status, trigger_type, trigger_config, conditions,
           actions, template_id, total_enrolled, active_enrolled, total_executions,
           last_executed_at, created_at, updated_at
    FROM automations
"#;

#[derive(sqlx::FromRow)]
struct AutomationRow {
    id: Uuid,
    business_id: String,
    name: String,
    description: Option<String>,
    status: AutomationStatus,
    trigger_type: String,
    trigger_config: serde_json::Value,
    conditions: serde_json::Value,
    actions: serde_json::Value,
    template_id: String,
    total_enrolled: i64,
    active_enrolled: i64,
    total_executions: i64,
    last_executed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AutomationRow> for Automation {
    type Error = EngineError;

    fn try_from(row: AutomationRow) -> Result<Self> {
        let trigger_type = row
            .trigger_type
            .parse::<EventType>()
            .map_err(EngineError::Internal)?;
        Ok(Self {
            id: row.id,
            business_id: row.business_id,
            name: row.name,
            description: row.description,
            status: row.status,
            trigger_type,
            trigger_config: row.trigger_config,
            conditions: serde_json::from_value(row.conditions)?,
            actions: serde_json::from_value(row.actions)?,
            template_id: row.template_id,
            total_enrolled: row.total_enrolled,
            active_enrolled: row.active_enrolled,
            total_executions: row.total_executions,
            last_executed_at: row.last_executed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub struct AutomationRepository {
    pool: PgPool,
}

impl AutomationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn collect(rows: Vec<AutomationRow>) -> Result<Vec<Automation>> {
        rows.into_iter().map(Automation::try_from).collect()
    }
}

#[async_trait]
impl AutomationRepositoryTrait for AutomationRepository {
    async fn create(&self, automation: &Automation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO automations
                (id, business_id, name, description, status, trigger_type, trigger_config,
                 conditions, actions, template_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(automation.id)
        .bind(&automation.business_id)
        .bind(&automation.name)
        .bind(&automation.description)
        .bind(automation.status)
        .bind(automation.trigger_type.as_str())
        .bind(&automation.trigger_config)
        .bind(serde_json::to_value(&automation.conditions)?)
        .bind(serde_json::to_value(&automation.actions)?)
        .bind(&automation.template_id)
        .bind(automation.created_at)
        .bind(automation.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, automation: &Automation, expected: AutomationStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE automations
            SET name = $2, description = $3, status = $4, trigger_type = $5, trigger_config = $6,
                conditions = $7, actions = $8, template_id = $9, updated_at = $10
            WHERE id = $1 AND status = $11
            "#,
        )
        .bind(automation.id)
        .bind(&automation.name)
        .bind(&automation.description)
        .bind(automation.status)
        .bind(automation.trigger_type.as_str())
        .bind(&automation.trigger_config)
        .bind(serde_json::to_value(&automation.conditions)?)
        .bind(serde_json::to_value(&automation.actions)?)
        .bind(&automation.template_id)
        .bind(automation.updated_at)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        // 区分记录不存在与状态已被并发修改
        let current: Option<AutomationStatus> =
            sqlx::query_scalar(r#"SELECT status FROM automations WHERE id = $1"#)
                .bind(automation.id)
                .fetch_optional(&self.pool)
                .await?;
        match current {
            Some(status) => Err(EngineError::InvalidStatusTransition {
                from: status.to_string(),
                to: automation.status.to_string(),
            }),
            None => Err(EngineError::AutomationNotFound(automation.id.to_string())),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Automation>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = $1");
        sqlx::query_as::<_, AutomationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Automation::try_from)
            .transpose()
    }

    async fn list(
        &self,
        business_id: &str,
        status: Option<AutomationStatus>,
    ) -> Result<Vec<Automation>> {
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "{SELECT_COLUMNS} WHERE business_id = $1 AND status = $2 ORDER BY created_at DESC"
                );
                sqlx::query_as::<_, AutomationRow>(&sql)
                    .bind(business_id)
                    .bind(status)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!("{SELECT_COLUMNS} WHERE business_id = $1 ORDER BY created_at DESC");
                sqlx::query_as::<_, AutomationRow>(&sql)
                    .bind(business_id)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Self::collect(rows)
    }

    async fn list_published_for(
        &self,
        business_id: &str,
        trigger_type: EventType,
        template_id: &str,
    ) -> Result<Vec<Automation>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE business_id = $1 AND trigger_type = $2 AND template_id = $3 \
             AND status = 'published' ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, AutomationRow>(&sql)
            .bind(business_id)
            .bind(trigger_type.as_str())
            .bind(template_id)
            .fetch_all(&self.pool)
            .await?;
        Self::collect(rows)
    }

    async fn record_execution(&self, id: Uuid, enrolled: bool, at: DateTime<Utc>) -> Result<()> {
        let enrolled_delta: i64 = if enrolled { 1 } else { 0 };
        sqlx::query(
            r#"
            UPDATE automations
            SET total_executions = total_executions + 1,
                total_enrolled = total_enrolled + $2,
                active_enrolled = active_enrolled + $2,
                last_executed_at = GREATEST(COALESCE(last_executed_at, $3), $3)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(enrolled_delta)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
