//! 行为策略仓储

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::PolicyRepositoryTrait;
use crate::error::Result;
use crate::models::{ActionPolicy, ActionType};

pub struct PolicyRepository {
    pool: PgPool,
}

impl PolicyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyRepositoryTrait for PolicyRepository {
    async fn get(&self, business_id: &str, action_type: ActionType) -> Result<Option<ActionPolicy>> {
        let policy = sqlx::query_as::<_, ActionPolicy>(
            r#"
            SELECT business_id, action_type, enabled, auto_approve, max_per_day, max_amount,
                   cooldown_minutes, requires_evidence, requires_staff_review, points_award, updated_at
            FROM action_policies
            WHERE business_id = $1 AND action_type = $2
            "#,
        )
        .bind(business_id)
        .bind(action_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(policy)
    }

    async fn upsert(&self, policy: &ActionPolicy) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO action_policies
                (business_id, action_type, enabled, auto_approve, max_per_day, max_amount,
                 cooldown_minutes, requires_evidence, requires_staff_review, points_award, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            ON CONFLICT (business_id, action_type) DO UPDATE SET
                enabled = EXCLUDED.enabled,
                auto_approve = EXCLUDED.auto_approve,
                max_per_day = EXCLUDED.max_per_day,
                max_amount = EXCLUDED.max_amount,
                cooldown_minutes = EXCLUDED.cooldown_minutes,
                requires_evidence = EXCLUDED.requires_evidence,
                requires_staff_review = EXCLUDED.requires_staff_review,
                points_award = EXCLUDED.points_award,
                updated_at = NOW()
            "#,
        )
        .bind(&policy.business_id)
        .bind(policy.action_type)
        .bind(policy.enabled)
        .bind(policy.auto_approve)
        .bind(policy.max_per_day)
        .bind(policy.max_amount)
        .bind(policy.cooldown_minutes)
        .bind(policy.requires_evidence)
        .bind(policy.requires_staff_review)
        .bind(policy.points_award)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self, business_id: &str) -> Result<Vec<ActionPolicy>> {
        let policies = sqlx::query_as::<_, ActionPolicy>(
            r#"
            SELECT business_id, action_type, enabled, auto_approve, max_per_day, max_amount,
                   cooldown_minutes, requires_evidence, requires_staff_review, points_award, updated_at
            FROM action_policies
            WHERE business_id = $1
            ORDER BY action_type
            "#,
        )
        .bind(business_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(policies)
    }
}
