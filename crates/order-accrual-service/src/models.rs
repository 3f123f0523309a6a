//! 领域模型定义
//!
//! 订单、提现流水、余额和订单状态机。所有枚举都支持数据库（sqlx）
//! 和 JSON（serde）序列化，线上格式与外部积分计算服务的状态词表一致。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 订单状态
///
/// 状态机：New -> Processing -> {Processed | Invalid}。
/// 状态推进完全由外部积分计算服务的应答驱动，Worker 自身不发明转移；
/// Processed 和 Invalid 为吸收态，进入后不再参与对账。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// 新提交 - 尚未被积分计算服务受理
    #[default]
    New,
    /// 计算中 - 已受理但未出结果
    Processing,
    /// 已拒绝 - 订单不参与积分计算，积分强制为 0
    Invalid,
    /// 已完成 - 积分金额已定，非负
    Processed,
}

impl OrderStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Invalid)
    }
}

/// 订单
///
/// 提交时创建，此后只有对账 Worker 会更新 status 和 accrual 两列，
/// 永不删除。
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Order {
    #[serde(skip)]
    pub id: i64,
    pub number: String,
    pub status: OrderStatus,
    pub accrual: Decimal,
    pub uploaded_at: DateTime<Utc>,
    #[serde(skip)]
    pub user_id: i64,
}

/// 提现流水
///
/// 仅通过准入成功的提现请求创建，创建后不可变。
/// order_number 全局唯一：一笔订单的积分至多被消费一次。
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Withdrawal {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub user_id: i64,
    #[serde(rename = "order")]
    pub order_number: String,
    pub amount: Decimal,
    pub processed_at: DateTime<Utc>,
}

/// 用户余额（派生值，不落库）
///
/// current = Σ 订单积分 - Σ 已提现金额
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub current: Decimal,
    pub withdrawn: Decimal,
}

/// 外部积分计算服务对单笔订单的应答
///
/// 瞬态数据，只被折叠进 Order，不单独持久化。
/// status 在反序列化时即按状态词表校验，未知取值会直接解析失败，
/// 由客户端当作瞬态错误处理，不会被盲目落库。
#[derive(Debug, Clone, Deserialize)]
pub struct AccrualReply {
    pub order: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub accrual: Option<Decimal>,
}

/// 对账 Worker 追踪的订单条目
///
/// 提交成功后进入 Worker 的工作集，终态落库确认后被移出。
#[derive(Debug, Clone)]
pub struct TrackedOrder {
    pub number: String,
    pub user_id: i64,
    pub status: OrderStatus,
    pub accrual: Decimal,
}

impl TrackedOrder {
    pub fn from_order(order: &Order) -> Self {
        Self {
            number: order.number.clone(),
            user_id: order.user_id,
            status: order.status,
            accrual: order.accrual,
        }
    }
}
