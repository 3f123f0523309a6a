//! 业务操作门面
//!
//! 请求处理层（路由、鉴权、解码都在本服务之外）只通过这里暴露的
//! 操作与核心交互：提交订单、查询余额、请求提现、列表查询。
//! 校验失败和业务拒绝以结果枚举表达，只有系统故障才走错误通道。

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info};

use loyalty_shared::error::Result;

use crate::luhn;
use crate::models::{Balance, Order, TrackedOrder, Withdrawal};
use crate::repository::{OrderRepositoryTrait, WithdrawalAdmission, WithdrawalRepositoryTrait};
use crate::worker::OrderQueue;

/// 订单提交结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// 新订单已受理并进入对账队列
    Accepted,
    /// 同一用户重复提交，视为幂等成功
    AlreadyOwnedByCaller,
    /// 订单号已被其他用户占用
    OwnedByOther,
    /// 订单号未通过 Luhn 校验
    Invalid,
}

/// 提现请求结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawOutcome {
    /// 已准入，流水已落库
    Admitted,
    /// 可用余额不足，业务拒绝而非系统错误
    InsufficientFunds { current: Decimal },
    /// 订单号未通过 Luhn 校验或金额非正
    InvalidOrder,
    /// 该订单号已有提现流水
    DuplicateOrder,
}

/// 订单积分服务
///
/// 由组装入口显式构造：持有持久化网关和对账队列的发送端，
/// 自身无状态，可被任意多个请求处理任务共享。
pub struct OrderAccrualService {
    orders: Arc<dyn OrderRepositoryTrait>,
    withdrawals: Arc<dyn WithdrawalRepositoryTrait>,
    queue: OrderQueue,
}

impl OrderAccrualService {
    pub fn new(
        orders: Arc<dyn OrderRepositoryTrait>,
        withdrawals: Arc<dyn WithdrawalRepositoryTrait>,
        queue: OrderQueue,
    ) -> Self {
        Self {
            orders,
            withdrawals,
            queue,
        }
    }

    /// 提交订单号
    ///
    /// 校验 -> 幂等插入 -> 新订单投递给对账 Worker。
    /// 队列满时投递会阻塞当前请求，这是系统唯一的背压点。
    pub async fn submit(&self, number: &str, user_id: i64) -> Result<SubmitOutcome> {
        if !luhn::is_valid(number) {
            debug!(order = number, "订单号校验失败");
            return Ok(SubmitOutcome::Invalid);
        }

        let (order, newly_created) = self.orders.insert_order(number, user_id).await?;

        if !newly_created {
            // 归属同一用户视为幂等成功，否则是真冲突
            return Ok(if order.user_id == user_id {
                SubmitOutcome::AlreadyOwnedByCaller
            } else {
                SubmitOutcome::OwnedByOther
            });
        }

        self.queue.push(TrackedOrder::from_order(&order)).await?;

        info!(order = number, user_id, "订单已受理，进入对账队列");
        Ok(SubmitOutcome::Accepted)
    }

    /// 查询用户余额
    ///
    /// 两次独立的聚合读之间理论上可能插入一笔提现，读到的快照仅用于
    /// 展示；提现准入的权威校验在存储层事务内完成，不依赖这里的结果。
    pub async fn balance(&self, user_id: i64) -> Result<Balance> {
        let accrued = self.orders.sum_accrual(user_id).await?;
        let withdrawn = self.withdrawals.sum_withdrawals(user_id).await?;

        Ok(Balance {
            current: accrued - withdrawn,
            withdrawn,
        })
    }

    /// 请求提现
    ///
    /// 订单号校验在前，准入校验与流水插入由存储层原子完成。
    pub async fn withdraw(
        &self,
        user_id: i64,
        order_number: &str,
        amount: Decimal,
    ) -> Result<WithdrawOutcome> {
        if !luhn::is_valid(order_number) || amount <= Decimal::ZERO {
            debug!(order = order_number, %amount, "提现请求校验失败");
            return Ok(WithdrawOutcome::InvalidOrder);
        }

        let outcome = match self
            .withdrawals
            .admit_withdrawal(user_id, order_number, amount)
            .await?
        {
            WithdrawalAdmission::Admitted => {
                info!(user_id, order = order_number, %amount, "提现已准入");
                WithdrawOutcome::Admitted
            }
            WithdrawalAdmission::Insufficient { current } => {
                WithdrawOutcome::InsufficientFunds { current }
            }
            WithdrawalAdmission::Duplicate => WithdrawOutcome::DuplicateOrder,
        };

        Ok(outcome)
    }

    /// 用户订单列表，按提交时间升序
    pub async fn orders(&self, user_id: i64) -> Result<Vec<Order>> {
        self.orders.list_by_user(user_id).await
    }

    /// 用户提现流水，按处理时间降序
    pub async fn withdrawals(&self, user_id: i64) -> Result<Vec<Withdrawal>> {
        self.withdrawals.list_by_user(user_id).await
    }
}
