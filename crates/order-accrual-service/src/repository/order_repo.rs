//! 订单仓储
//!
//! 提供订单的幂等插入、对账结果回写和按用户的积分聚合查询。

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};

use loyalty_shared::error::{LoyaltyError, Result};

use super::traits::OrderRepositoryTrait;
use crate::models::{Order, OrderStatus};

/// 订单仓储
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepositoryTrait for OrderRepository {
    /// 幂等插入订单
    ///
    /// 依赖 number 列的唯一约束：ON CONFLICT DO NOTHING 后无返回行
    /// 说明订单已存在，再查出既有记录交给调用方判断归属。
    async fn insert_order(&self, number: &str, user_id: i64) -> Result<(Order, bool)> {
        let inserted = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (number, user_id, status, accrual, uploaded_at)
            VALUES ($1, $2, $3, 0, NOW())
            ON CONFLICT (number) DO NOTHING
            RETURNING id, number, status, accrual, uploaded_at, user_id
            "#,
        )
        .bind(number)
        .bind(user_id)
        .bind(OrderStatus::New)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(order) = inserted {
            return Ok((order, true));
        }

        let existing = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, number, status, accrual, uploaded_at, user_id
            FROM orders
            WHERE number = $1
            "#,
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| LoyaltyError::NotFound {
            entity: "Order".to_string(),
            id: number.to_string(),
        })?;

        Ok((existing, false))
    }

    async fn update_status_and_accrual(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Decimal,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, accrual = $3
            WHERE number = $1
            "#,
        )
        .bind(number)
        .bind(status)
        .bind(accrual)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LoyaltyError::NotFound {
                entity: "Order".to_string(),
                id: number.to_string(),
            });
        }

        Ok(())
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, number, status, accrual, uploaded_at, user_id
            FROM orders
            WHERE user_id = $1
            ORDER BY uploaded_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    async fn sum_accrual(&self, user_id: i64) -> Result<Decimal> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(accrual), 0) AS total
            FROM orders
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("total"))
    }
}
