//! Outbox 引擎（OutboxEngine）
//!
//! 统一编排“发布 → 分发 → 重试”的长驻任务：
//! - 创建分发通道，向外暴露发布器；
//! - 启动分发器 worker 池，并发消费信封；
//! - 按 `retry_interval` 周期驱动重试调度器；
//! - 提供关闭与等待的 `EngineHandle`。
//!
use super::{Dispatcher, EventPublisher, HandlerRegistry, InFlight, RetryScheduler};
use crate::config::OutboxConfig;
use crate::error::OutboxResult;
use crate::persist::EventRecordStore;
use bon::Builder;
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Builder)]
pub struct OutboxEngine {
    store: Arc<dyn EventRecordStore>,
    handlers: HandlerRegistry,
    #[builder(default)]
    config: OutboxConfig,
}

impl OutboxEngine {
    /// 启动引擎，返回可用于发布、关闭与等待的句柄
    pub fn start(self) -> OutboxResult<EngineHandle> {
        self.config.validate()?;

        let token = CancellationToken::new();
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(2);

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let payloads = Arc::new(self.handlers.payloads().clone());
        let handlers = Arc::new(self.handlers);
        let in_flight = InFlight::new();
        let publisher = EventPublisher::new(self.store.clone(), payloads, tx, in_flight.clone());

        // dispatch worker（长循环）
        {
            let dispatcher = Arc::new(Dispatcher::new(
                self.store.clone(),
                handlers.clone(),
                self.config,
                in_flight,
            ));
            tasks.push(tokio::spawn(dispatcher.run(rx, token.clone())));
        }

        // retry worker（周期任务）
        {
            let scheduler = Arc::new(RetryScheduler::new(
                self.store.clone(),
                publisher.clone(),
                self.config,
            ));
            let interval = self.config.retry_interval;

            tasks.push(Self::spawn_periodic(token.clone(), interval, move || {
                let scheduler = scheduler.clone();
                async move {
                    let report = scheduler.tick(Utc::now()).await;
                    debug!(?report, "retry scan finished");
                }
            }));
        }

        info!(
            event_types = ?handlers.event_types(),
            max_retries = self.config.max_retries,
            "outbox engine started"
        );

        Ok(EngineHandle {
            token,
            tasks,
            publisher,
        })
    }

    fn spawn_periodic<F, Fut>(
        token: CancellationToken,
        interval: Duration,
        mut f: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => f().await,
                }
            }
        })
    }
}

/// 引擎运行句柄：用于发布事件、优雅关闭与等待任务结束
///
/// 关闭后已取出的信封会处理完毕；仍在通道中的信封被丢弃，对应记录保持 PENDING，
/// 由下次启动后的 PENDING 补偿重新投递。
pub struct EngineHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    publisher: EventPublisher,
}

impl EngineHandle {
    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            let _ = t.await;
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
