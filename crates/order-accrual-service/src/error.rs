//! 积分查询客户端错误类型
//!
//! 对 Worker 而言这些错误全部是瞬态的：留在下一轮对账重试，
//! 永远不会回传给最初提交订单的用户。存储层和业务层的错误
//! 直接使用共享库的 LoyaltyError。

/// 积分查询错误
#[derive(Debug, thiserror::Error)]
pub enum AccrualError {
    /// 非 200 应答，包括"结果尚未计算出来"的 204，下一轮重试
    #[error("积分结果尚未就绪: order={order}, http_status={status}")]
    NoResult { order: String, status: u16 },

    /// 网络层失败（连接、超时等）
    #[error("积分计算服务请求失败: {0}")]
    Transport(#[from] reqwest::Error),

    /// 应答体无法解析，包括未知的状态取值（在边界处失败关闭）
    #[error("积分应答解析失败: order={order} - {message}")]
    Decode { order: String, message: String },
}
