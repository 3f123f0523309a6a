//! 持久化网关
//!
//! 核心只依赖这里暴露的少量存储操作：按订单号幂等插入、状态回写、
//! 按用户聚合求和、原子化的提现准入。服务层依赖 trait 抽象而非具体实现，
//! 支持 mock 测试。

mod order_repo;
mod traits;
mod withdrawal_repo;

pub use order_repo::OrderRepository;
pub use traits::{OrderRepositoryTrait, WithdrawalAdmission, WithdrawalRepositoryTrait};
pub use withdrawal_repo::WithdrawalRepository;

#[cfg(test)]
pub use traits::{MockOrderRepositoryTrait, MockWithdrawalRepositoryTrait};
