//! 积分账本仓储
//!
//! 入账在单个事务内完成：锁定余额行 → 按来源引用查重 → 写流水 → 更新余额。
//! 余额行的行锁串行化同一会员的并发入账，查重与变更因此处于同一临界区。

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use super::traits::LedgerRepositoryTrait;
use crate::error::{EngineError, Result, map_ledger_db_error};
use crate::models::{CreditResult, LedgerCredit, PointsLedgerEntry};

pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中入账
    ///
    /// 唯一约束冲突（并发实例绕过了行锁）同样映射为账本冲突，重试时会命中查重分支
    pub async fn apply_in_tx(tx: &mut PgConnection, credit: &LedgerCredit) -> Result<CreditResult> {
        let conflict = |e: sqlx::Error| -> EngineError {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return EngineError::LedgerConflict {
                    customer_id: credit.customer_id.clone(),
                };
            }
            map_ledger_db_error(e, &credit.customer_id)
        };

        sqlx::query(
            r#"
            INSERT INTO points_balances (business_id, customer_id, balance)
            VALUES ($1, $2, 0)
            ON CONFLICT (business_id, customer_id) DO NOTHING
            "#,
        )
        .bind(&credit.business_id)
        .bind(&credit.customer_id)
        .execute(&mut *tx)
        .await
        .map_err(conflict)?;

        let balance: i64 = sqlx::query_scalar(
            r#"
            SELECT balance FROM points_balances
            WHERE business_id = $1 AND customer_id = $2
            FOR UPDATE
            "#,
        )
        .bind(&credit.business_id)
        .bind(&credit.customer_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(conflict)?;

        if let Some(row) =
            sqlx::query(r#"SELECT id, balance_after FROM points_ledger WHERE source_ref = $1"#)
                .bind(&credit.source_ref)
                .fetch_optional(&mut *tx)
                .await
                .map_err(conflict)?
        {
            return Ok(CreditResult {
                entry_id: row.get("id"),
                balance: row.get("balance_after"),
                applied: false,
            });
        }

        let next = credit.next_balance(balance)?;

        let entry_id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO points_ledger
                (id, business_id, customer_id, delta, reason, source_request_id, source_ref, balance_after, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            "#,
        )
        .bind(entry_id)
        .bind(&credit.business_id)
        .bind(&credit.customer_id)
        .bind(credit.delta)
        .bind(&credit.reason)
        .bind(credit.source_request_id)
        .bind(&credit.source_ref)
        .bind(next)
        .execute(&mut *tx)
        .await
        .map_err(conflict)?;

        sqlx::query(
            r#"
            UPDATE points_balances SET balance = $3, updated_at = NOW()
            WHERE business_id = $1 AND customer_id = $2
            "#,
        )
        .bind(&credit.business_id)
        .bind(&credit.customer_id)
        .bind(next)
        .execute(&mut *tx)
        .await
        .map_err(conflict)?;

        Ok(CreditResult {
            entry_id,
            balance: next,
            applied: true,
        })
    }
}

#[async_trait]
impl LedgerRepositoryTrait for LedgerRepository {
    async fn apply(&self, credit: &LedgerCredit) -> Result<CreditResult> {
        let mut tx = self.pool.begin().await?;
        let result = Self::apply_in_tx(&mut tx, credit).await?;
        tx.commit()
            .await
            .map_err(|e| map_ledger_db_error(e, &credit.customer_id))?;
        Ok(result)
    }

    async fn balance(&self, business_id: &str, customer_id: &str) -> Result<i64> {
        let balance: Option<i64> = sqlx::query_scalar(
            r#"SELECT balance FROM points_balances WHERE business_id = $1 AND customer_id = $2"#,
        )
        .bind(business_id)
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(balance.unwrap_or(0))
    }

    async fn history(
        &self,
        business_id: &str,
        customer_id: &str,
        limit: i64,
    ) -> Result<Vec<PointsLedgerEntry>> {
        let entries = sqlx::query_as::<_, PointsLedgerEntry>(
            r#"
            SELECT id, business_id, customer_id, delta, reason, source_request_id, source_ref,
                   balance_after, created_at
            FROM points_ledger
            WHERE business_id = $1 AND customer_id = $2
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(business_id)
        .bind(customer_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}
