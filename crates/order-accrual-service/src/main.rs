//! 订单积分对账服务入口
//!
//! 组装配置、日志、数据库、持久化网关、积分客户端与对账 Worker。
//! Worker 不是全局单例：通道和工作集都由这里显式构造并交接。

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;

use loyalty_shared::{config::AppConfig, database::Database, observability};
use order_accrual_service::{
    accrual::HttpAccrualClient,
    repository::{OrderRepository, WithdrawalRepository},
    service::OrderAccrualService,
    worker::AccrualWorker,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 统一加载配置：config/*.toml + LOYALTY_ 前缀环境变量
    let config = AppConfig::load("order-accrual-service").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    // 2. 初始化日志
    observability::init(&config.observability)?;

    info!("Starting order-accrual-service...");
    info!(
        environment = %config.environment,
        accrual_base_url = %config.accrual.base_url,
        "Configuration loaded"
    );

    // 3. 初始化数据库连接并执行迁移
    let db = Database::connect(&config.database).await?;
    sqlx::migrate!("./migrations").run(db.pool()).await?;
    info!("Database connection established");

    // 4. 创建仓储
    let order_repo = Arc::new(OrderRepository::new(db.pool().clone()));
    let withdrawal_repo = Arc::new(WithdrawalRepository::new(db.pool().clone()));
    info!("Repositories initialized");

    // 5. 创建积分客户端与对账 Worker
    let accrual_client = Arc::new(HttpAccrualClient::new(&config.accrual)?);
    let (worker, queue) = AccrualWorker::new(&config.worker, accrual_client, order_repo.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = tokio::spawn(worker.run(shutdown_rx));

    // 6. 组装业务门面；HTTP 路由与请求解码在本仓库之外接入
    let _service = Arc::new(OrderAccrualService::new(
        order_repo,
        withdrawal_repo,
        queue,
    ));
    info!("Service initialized");

    // 7. 等待停机信号；当前轮次未完成的对账工作直接放弃
    shutdown_signal().await;
    shutdown_tx.send(true)?;
    worker_handle.await?;

    db.close().await;
    info!("Shutdown complete");
    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("注册 Ctrl+C 处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("注册 SIGTERM 处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
