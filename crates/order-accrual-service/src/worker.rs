//! 对账队列与后台 Worker
//!
//! 提交成功的订单经有界通道进入 Worker 私有的工作集，Worker 以固定间隔
//! 对工作集里的非终态订单逐一向积分计算服务查询，把结果写穿到存储层。
//! 工作集只被 Worker 任务读写，无需加锁；通道是唯一的跨任务交接点，
//! 通道满时提交方会被阻塞，这是系统仅有的背压机制。
//!
//! 与常见实现不同的两个关键点：
//! - 只有落库成功后才把新状态提交到内存条目，避免"终态已在内存、
//!   落库却失败"造成的更新丢失；
//! - 终态订单在落库确认后立即移出工作集，工作集不随历史订单总量增长。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use loyalty_shared::config::WorkerConfig;
use loyalty_shared::error::{LoyaltyError, Result};

use crate::accrual::AccrualService;
use crate::models::{OrderStatus, TrackedOrder};
use crate::repository::OrderRepositoryTrait;

/// 订单提交队列（生产者侧）
///
/// 任意数量的请求处理任务持有它向 Worker 投递新订单。
#[derive(Clone)]
pub struct OrderQueue {
    tx: mpsc::Sender<TrackedOrder>,
}

impl OrderQueue {
    /// 投递一笔新订单给对账 Worker
    ///
    /// 队列满时会阻塞等待空间，调用方需要对此有预期。
    pub async fn push(&self, order: TrackedOrder) -> Result<()> {
        self.tx
            .send(order)
            .await
            .map_err(|_| LoyaltyError::Internal("对账队列已关闭".to_string()))
    }
}

/// 对账 Worker
///
/// 进程生命周期内的单例后台任务，但不是全局可达的单例对象：
/// 由组装入口显式构造并持有，通道与工作集都归它独占。
pub struct AccrualWorker {
    rx: mpsc::Receiver<TrackedOrder>,
    accrual: Arc<dyn AccrualService>,
    orders: Arc<dyn OrderRepositoryTrait>,
    tick_interval: Duration,
    /// 工作集：等待终态结果的订单，按订单号索引
    tracked: HashMap<String, TrackedOrder>,
}

impl AccrualWorker {
    /// 创建 Worker 和与之配对的提交队列
    pub fn new(
        config: &WorkerConfig,
        accrual: Arc<dyn AccrualService>,
        orders: Arc<dyn OrderRepositoryTrait>,
    ) -> (Self, OrderQueue) {
        let (tx, rx) = mpsc::channel(config.queue_capacity);

        let worker = Self {
            rx,
            accrual,
            orders,
            tick_interval: Duration::from_secs(config.tick_interval_seconds),
            tracked: HashMap::new(),
        };

        (worker, OrderQueue { tx })
    }

    /// 主循环：三个唤醒源，直到收到 shutdown 信号
    ///
    /// - 通道有新订单 -> 并入工作集
    /// - 定时器到点 -> 跑一轮对账
    /// - shutdown 信号 -> 退出，当前轮次未完成的工作直接放弃
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            tick_interval = ?self.tick_interval,
            "对账 Worker 已启动"
        );

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_order = self.rx.recv() => {
                    match maybe_order {
                        Some(order) => self.track(order),
                        // 所有提交端已关闭，没有新订单可等
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if self.tracked.is_empty() {
                        continue;
                    }
                    self.reconcile_pass().await;
                }
                changed = shutdown.changed() => {
                    // 发送端被丢弃等同于收到关停信号
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(pending = self.tracked.len(), "对账 Worker 已退出");
    }

    /// 新订单并入工作集
    fn track(&mut self, order: TrackedOrder) {
        debug!(order = %order.number, user_id = order.user_id, "订单进入对账工作集");
        self.tracked.insert(order.number.clone(), order);
    }

    /// 一轮对账：遍历工作集，逐笔查询并回写
    ///
    /// 查询失败的订单原状态保留，下一轮重试，没有退避也没有上限；
    /// 落库失败同样只记日志继续，内存条目不变所以下一轮会再写。
    async fn reconcile_pass(&mut self) {
        let numbers: Vec<String> = self.tracked.keys().cloned().collect();
        let mut updated = 0usize;
        let mut finalized = 0usize;

        for number in numbers {
            // 终态条目在落库确认时即被移出工作集，这里只会遇到非终态订单
            let Some(entry) = self.tracked.get(&number) else {
                continue;
            };
            if entry.status.is_terminal() {
                continue;
            }

            let reply = match self.accrual.fetch(&number).await {
                Ok(reply) => reply,
                Err(e) => {
                    debug!(order = %number, error = %e, "积分结果未就绪，下一轮重试");
                    continue;
                }
            };

            // INVALID 订单积分强制归零；正常应答缺省 accrual 视为 0
            let accrual = if reply.status == OrderStatus::Invalid {
                Decimal::ZERO
            } else {
                reply.accrual.unwrap_or(Decimal::ZERO)
            };

            // 先落库，成功后才提交到内存条目。顺序不能反：
            // 若先改内存再落库失败，终态条目会被跳过，结果就永远丢了。
            if let Err(e) = self
                .orders
                .update_status_and_accrual(&number, reply.status, accrual)
                .await
            {
                warn!(order = %number, error = %e, "对账结果落库失败，下一轮重写");
                continue;
            }

            if let Some(entry) = self.tracked.get_mut(&number) {
                entry.status = reply.status;
                entry.accrual = accrual;
                updated += 1;

                if reply.status.is_terminal() {
                    debug!(order = %number, status = ?reply.status, %accrual, "订单到达终态，移出工作集");
                    self.tracked.remove(&number);
                    finalized += 1;
                }
            }
        }

        info!(
            tracked = self.tracked.len(),
            updated, finalized, "对账轮次完成"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AccrualError;
    use crate::models::AccrualReply;
    use crate::repository::MockOrderRepositoryTrait;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock 实现：按订单号返回预设应答，并统计调用次数
    struct MockAccrualService {
        replies: Mutex<HashMap<String, AccrualReply>>,
        calls: AtomicUsize,
    }

    impl MockAccrualService {
        fn new() -> Self {
            Self {
                replies: Mutex::new(HashMap::new()),
                calls: AtomicUsize::new(0),
            }
        }

        fn with_reply(self, number: &str, status: OrderStatus, accrual: Option<Decimal>) -> Self {
            self.replies.lock().unwrap().insert(
                number.to_string(),
                AccrualReply {
                    order: number.to_string(),
                    status,
                    accrual,
                },
            );
            self
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AccrualService for MockAccrualService {
        async fn fetch(
            &self,
            order_number: &str,
        ) -> std::result::Result<AccrualReply, AccrualError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .get(order_number)
                .cloned()
                .ok_or(AccrualError::NoResult {
                    order: order_number.to_string(),
                    status: 204,
                })
        }
    }

    fn tracked_new(number: &str) -> TrackedOrder {
        TrackedOrder {
            number: number.to_string(),
            user_id: 1,
            status: OrderStatus::New,
            accrual: Decimal::ZERO,
        }
    }

    fn make_worker(
        accrual: Arc<MockAccrualService>,
        orders: MockOrderRepositoryTrait,
    ) -> AccrualWorker {
        let (worker, _queue) = AccrualWorker::new(
            &WorkerConfig::default(),
            accrual,
            Arc::new(orders),
        );
        worker
    }

    /// 终态应答：落库后条目移出工作集，后续轮次不再查询
    #[tokio::test]
    async fn test_processed_order_is_persisted_and_evicted() {
        let accrual = Arc::new(MockAccrualService::new().with_reply(
            "12345678903",
            OrderStatus::Processed,
            Some(Decimal::new(314, 2)),
        ));

        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_update_status_and_accrual()
            .withf(|number, status, accrual| {
                number == "12345678903"
                    && *status == OrderStatus::Processed
                    && *accrual == Decimal::new(314, 2)
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut worker = make_worker(accrual.clone(), orders);
        worker.track(tracked_new("12345678903"));

        worker.reconcile_pass().await;
        assert!(worker.tracked.is_empty());
        assert_eq!(accrual.call_count(), 1);

        // 第二轮不再触达积分计算服务
        worker.reconcile_pass().await;
        assert_eq!(accrual.call_count(), 1);
    }

    /// 瞬态失败：状态保留，下一轮继续查询
    #[tokio::test]
    async fn test_transient_failure_retries_next_pass() {
        // 不预设应答 -> fetch 返回 NoResult
        let accrual = Arc::new(MockAccrualService::new());

        let mut orders = MockOrderRepositoryTrait::new();
        orders.expect_update_status_and_accrual().never();

        let mut worker = make_worker(accrual.clone(), orders);
        worker.track(tracked_new("12345678903"));

        worker.reconcile_pass().await;
        worker.reconcile_pass().await;

        assert_eq!(accrual.call_count(), 2);
        assert_eq!(
            worker.tracked.get("12345678903").unwrap().status,
            OrderStatus::New
        );
    }

    /// 落库失败：内存条目保持非终态，下一轮重写终态结果
    #[tokio::test]
    async fn test_persist_failure_keeps_order_tracked() {
        let accrual = Arc::new(MockAccrualService::new().with_reply(
            "12345678903",
            OrderStatus::Processed,
            Some(Decimal::new(955, 2)),
        ));

        let mut orders = MockOrderRepositoryTrait::new();
        // 第一轮落库失败，第二轮成功
        orders
            .expect_update_status_and_accrual()
            .times(2)
            .returning({
                let attempts = AtomicUsize::new(0);
                move |_, _, _| {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(LoyaltyError::Database(sqlx::Error::PoolTimedOut))
                    } else {
                        Ok(())
                    }
                }
            });

        let mut worker = make_worker(accrual.clone(), orders);
        worker.track(tracked_new("12345678903"));

        worker.reconcile_pass().await;
        // 落库失败，条目仍在且未被标记为终态
        let entry = worker.tracked.get("12345678903").unwrap();
        assert_eq!(entry.status, OrderStatus::New);

        worker.reconcile_pass().await;
        // 第二轮落库成功并移出
        assert!(worker.tracked.is_empty());
        assert_eq!(accrual.call_count(), 2);
    }

    /// INVALID 应答强制积分归零
    #[tokio::test]
    async fn test_invalid_order_forces_zero_accrual() {
        let accrual = Arc::new(MockAccrualService::new().with_reply(
            "12345678903",
            OrderStatus::Invalid,
            Some(Decimal::new(999, 2)),
        ));

        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_update_status_and_accrual()
            .withf(|number, status, accrual| {
                number == "12345678903"
                    && *status == OrderStatus::Invalid
                    && accrual.is_zero()
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut worker = make_worker(accrual, orders);
        worker.track(tracked_new("12345678903"));

        worker.reconcile_pass().await;
        assert!(worker.tracked.is_empty());
    }

    /// 中间态应答（PROCESSING）落库后继续留在工作集
    #[tokio::test]
    async fn test_processing_order_stays_tracked() {
        let accrual = Arc::new(MockAccrualService::new().with_reply(
            "12345678903",
            OrderStatus::Processing,
            None,
        ));

        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_update_status_and_accrual()
            .withf(|number, status, accrual| {
                number == "12345678903"
                    && *status == OrderStatus::Processing
                    && accrual.is_zero()
            })
            .times(2)
            .returning(|_, _, _| Ok(()));

        let mut worker = make_worker(accrual.clone(), orders);
        worker.track(tracked_new("12345678903"));

        worker.reconcile_pass().await;
        let entry = worker.tracked.get("12345678903").unwrap();
        assert_eq!(entry.status, OrderStatus::Processing);

        // 非终态下一轮仍会查询
        worker.reconcile_pass().await;
        assert_eq!(accrual.call_count(), 2);
    }

    /// shutdown 信号使主循环退出，放弃未完成的工作
    #[tokio::test]
    async fn test_shutdown_signal_stops_worker() {
        let accrual = Arc::new(MockAccrualService::new());
        let orders = MockOrderRepositoryTrait::new();
        let (worker, queue) = AccrualWorker::new(
            &WorkerConfig::default(),
            accrual,
            Arc::new(orders),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        queue.push(tracked_new("12345678903")).await.unwrap();
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("Worker 未在期限内退出")
            .unwrap();
    }

    /// 所有提交端关闭后主循环也会退出
    #[tokio::test]
    async fn test_worker_exits_when_queue_closed() {
        let accrual = Arc::new(MockAccrualService::new());
        let orders = MockOrderRepositoryTrait::new();
        let (worker, queue) = AccrualWorker::new(
            &WorkerConfig::default(),
            accrual,
            Arc::new(orders),
        );

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        drop(queue);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("Worker 未在期限内退出")
            .unwrap();
    }
}
