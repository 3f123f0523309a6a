//! 外部积分计算服务客户端封装
//!
//! 按订单号查询积分结果：GET {base_url}/api/orders/{number}。
//! 通过 AccrualService trait 抽象 HTTP 调用，便于测试时注入 mock 实现。
//! 客户端自身不做任何重试，重试策略完全由对账 Worker 掌握。

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

use loyalty_shared::config::AccrualConfig;

use crate::error::AccrualError;
use crate::models::AccrualReply;

// ---------------------------------------------------------------------------
// Trait 抽象 — 便于测试时替换为 mock 实现
// ---------------------------------------------------------------------------

/// 积分计算服务的抽象接口
///
/// 成功仅限于 HTTP 200 且应答体可解析；其余一切（非 200、网络失败、
/// 未知状态取值）都是瞬态失败，调用方应当"下一轮再试"而非视为永久错误。
#[async_trait]
pub trait AccrualService: Send + Sync {
    /// 查询单笔订单的积分结果
    async fn fetch(&self, order_number: &str) -> Result<AccrualReply, AccrualError>;
}

// ---------------------------------------------------------------------------
// HTTP 客户端实现
// ---------------------------------------------------------------------------

/// 封装积分计算服务 HTTP 调用
///
/// reqwest::Client 内部带连接池，clone 是廉价操作。
/// 请求超时取自配置，防止慢响应拖住整轮对账。
pub struct HttpAccrualClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAccrualClient {
    pub fn new(config: &AccrualConfig) -> Result<Self, AccrualError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        // 统一去掉尾部斜杠，拼接时再补
        let base_url = config.base_url.trim_end_matches('/').to_string();

        Ok(Self { client, base_url })
    }

    fn order_url(&self, order_number: &str) -> String {
        format!("{}/api/orders/{}", self.base_url, order_number)
    }
}

#[async_trait]
impl AccrualService for HttpAccrualClient {
    async fn fetch(&self, order_number: &str) -> Result<AccrualReply, AccrualError> {
        let resp = self.client.get(self.order_url(order_number)).send().await?;

        let status = resp.status();
        if status != StatusCode::OK {
            // 包括 204"尚未计算出结果"和 429 限流，统统留到下一轮
            debug!(order = order_number, http_status = status.as_u16(), "积分结果尚未就绪");
            return Err(AccrualError::NoResult {
                order: order_number.to_string(),
                status: status.as_u16(),
            });
        }

        // 未知状态取值会在这里解析失败，当作瞬态错误而非落库
        let body = resp.bytes().await?;
        let reply: AccrualReply =
            serde_json::from_slice(&body).map_err(|e| AccrualError::Decode {
                order: order_number.to_string(),
                message: e.to_string(),
            })?;

        Ok(reply)
    }
}
