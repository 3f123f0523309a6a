//! 订单积分对账服务
//!
//! 接收用户提交的订单号，后台 Worker 周期性地向外部积分计算服务查询
//! 每笔订单的积分结果，推进订单状态机并落库；同时基于已落库的积分与
//! 提现流水计算用户可用余额，用于准入或拒绝提现请求。

pub mod accrual;
pub mod error;
pub mod luhn;
pub mod models;
pub mod repository;
pub mod service;
pub mod worker;
