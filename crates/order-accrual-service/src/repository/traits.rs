//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于服务层和 Worker 依赖抽象而非具体实现，支持 mock 测试

use async_trait::async_trait;
use rust_decimal::Decimal;

use loyalty_shared::error::Result;

use crate::models::{Order, OrderStatus, Withdrawal};

/// 提现准入结果
///
/// 余额校验与流水插入在同一个事务内完成，三种结果互斥。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalAdmission {
    /// 已准入，流水已落库
    Admitted,
    /// 余额不足，附带校验时刻的可用余额
    Insufficient { current: Decimal },
    /// 该订单号已有提现流水，一笔订单的积分至多消费一次
    Duplicate,
}

/// 订单仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepositoryTrait: Send + Sync {
    /// 幂等插入订单：订单号已存在时返回既有记录
    ///
    /// 返回 (订单, 是否新建)。调用方据此区分"首次提交"与"重复提交"。
    async fn insert_order(&self, number: &str, user_id: i64) -> Result<(Order, bool)>;

    /// 回写对账结果，只更新 status 和 accrual 两列
    ///
    /// 这是对账 Worker 对订单的唯一写入口。
    async fn update_status_and_accrual(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Decimal,
    ) -> Result<()>;

    /// 用户全部订单，按提交时间升序
    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Order>>;

    /// 用户全部订单的积分总和
    async fn sum_accrual(&self, user_id: i64) -> Result<Decimal>;
}

/// 提现流水仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WithdrawalRepositoryTrait: Send + Sync {
    /// 原子化的提现准入：余额校验与流水插入在同一事务内完成
    ///
    /// 事务内先对 user_id 取 advisory 锁串行化同一用户的并发提现，
    /// 再重算余额并条件插入，杜绝两笔并发请求同时通过校验导致透支。
    async fn admit_withdrawal(
        &self,
        user_id: i64,
        order_number: &str,
        amount: Decimal,
    ) -> Result<WithdrawalAdmission>;

    /// 用户已提现金额总和
    async fn sum_withdrawals(&self, user_id: i64) -> Result<Decimal>;

    /// 用户全部提现流水，按处理时间降序
    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Withdrawal>>;
}
