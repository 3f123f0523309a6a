//! 提现流水仓储
//!
//! 提现准入是本服务唯一的安全关键写路径：余额校验和流水插入
//! 必须在同一事务内完成，否则两笔并发提现可以同时通过校验造成透支。

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;

use loyalty_shared::error::Result;

use super::traits::{WithdrawalAdmission, WithdrawalRepositoryTrait};
use crate::models::Withdrawal;

/// 提现流水仓储
pub struct WithdrawalRepository {
    pool: PgPool,
}

impl WithdrawalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 事务内重算用户可用余额
    async fn current_balance_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
    ) -> Result<Decimal> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE((SELECT SUM(accrual) FROM orders WHERE user_id = $1), 0)
                 - COALESCE((SELECT SUM(amount) FROM withdrawals WHERE user_id = $1), 0)
                 AS current
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.get("current"))
    }
}

#[async_trait]
impl WithdrawalRepositoryTrait for WithdrawalRepository {
    /// 原子化的提现准入
    ///
    /// 1. 对 user_id 取事务级 advisory 锁，串行化同一用户的并发提现；
    /// 2. 锁内重算可用余额，不足则回滚；
    /// 3. 插入流水，订单号唯一约束冲突映射为 Duplicate；
    /// 4. 提交。
    async fn admit_withdrawal(
        &self,
        user_id: i64,
        order_number: &str,
        amount: Decimal,
    ) -> Result<WithdrawalAdmission> {
        let mut tx = self.pool.begin().await?;

        // 同一用户的准入串行执行，锁随事务结束自动释放
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let current = Self::current_balance_in_tx(&mut tx, user_id).await?;
        if current < amount {
            debug!(user_id, %current, %amount, "提现余额不足，拒绝准入");
            return Ok(WithdrawalAdmission::Insufficient { current });
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO withdrawals (user_id, order_number, amount, processed_at)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(user_id)
        .bind(order_number)
        .bind(amount)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {
                tx.commit().await?;
                Ok(WithdrawalAdmission::Admitted)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Ok(WithdrawalAdmission::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn sum_withdrawals(&self, user_id: i64) -> Result<Decimal> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount), 0) AS total
            FROM withdrawals
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("total"))
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Withdrawal>> {
        let withdrawals = sqlx::query_as::<_, Withdrawal>(
            r#"
            SELECT id, user_id, order_number, amount, processed_at
            FROM withdrawals
            WHERE user_id = $1
            ORDER BY processed_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(withdrawals)
    }
}
