//! 事件分发器（Dispatcher）
//!
//! 在独立的 worker 池中逐个消费信封：
//! 1. 按 `record_id` 重新加载记录，缺失视为内部一致性故障，记录日志后丢弃；
//! 2. 幂等守卫：记录已离开 PENDING（RETRY/FAILED/PROCESSED）时直接跳过；
//! 3. 按事件类型查找处理器并调用；信封中的负载不是处理器的类型时，从记录中还原；
//! 4. 成功置为 PROCESSED，失败按重试上限置为 RETRY 或 FAILED。
//!
//! 每次结果写入都是独立的一次保存，处理器错误全部在此被吸收为记录状态，不向外传播。
//! 无论结果如何，处理完毕后都会释放该信封在 `InFlight` 中的登记。
//!
use super::InFlight;
use crate::config::OutboxConfig;
use crate::envelope::Envelope;
use crate::error::{OutboxError, OutboxResult};
use crate::event_record::{EventRecord, EventStatus, RecordId};
use crate::eventing::HandlerRegistry;
use crate::persist::EventRecordStore;
use chrono::Utc;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 单个信封的分发结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Processed,
    Retrying { retry_count: u32 },
    Failed { retry_count: u32 },
    /// 幂等守卫命中，处理器未被调用
    Skipped { status: EventStatus },
    /// 记录不存在或结果无法写回
    Dropped,
}

pub struct Dispatcher {
    store: Arc<dyn EventRecordStore>,
    handlers: Arc<HandlerRegistry>,
    config: OutboxConfig,
    in_flight: InFlight,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn EventRecordStore>,
        handlers: Arc<HandlerRegistry>,
        config: OutboxConfig,
        in_flight: InFlight,
    ) -> Self {
        Self {
            store,
            handlers,
            config,
            in_flight,
        }
    }

    /// 处理一个信封；所有错误都在内部吸收并体现在返回值与记录状态中
    pub async fn dispatch(&self, envelope: Envelope) -> DispatchOutcome {
        let id = envelope.record_id();
        let outcome = self.dispatch_record(envelope).await;
        self.in_flight.leave(id);
        outcome
    }

    async fn dispatch_record(&self, envelope: Envelope) -> DispatchOutcome {
        let id = envelope.record_id();

        let record = match self.store.find_by_id(id).await {
            Ok(record) => record,
            Err(OutboxError::NotFound { .. }) => {
                error!(record_id = %id, "event record not found; dropping envelope");
                return DispatchOutcome::Dropped;
            }
            Err(err) => {
                error!(record_id = %id, error = %err, "failed to load event record; dropping envelope");
                return DispatchOutcome::Dropped;
            }
        };

        if record.status() != EventStatus::Pending {
            info!(record_id = %id, status = %record.status(), "skipping event already past pending");
            return DispatchOutcome::Skipped {
                status: record.status(),
            };
        }

        let result = self.invoke(envelope, &record).await;

        match self.record_outcome(id, record, result).await {
            Ok(outcome) => outcome,
            Err(err) => {
                // 版本冲突意味着另一条路径已推进该记录，本次结果放弃
                warn!(record_id = %id, error = %err, "failed to persist dispatch outcome");
                DispatchOutcome::Dropped
            }
        }
    }

    async fn invoke(&self, envelope: Envelope, record: &EventRecord) -> anyhow::Result<()> {
        let event_type = envelope.event_type().clone();
        let Some(handler) = self.handlers.get(&event_type) else {
            return Err(OutboxError::HandlerNotFound(event_type.to_string()).into());
        };

        let envelope = if handler.accepts(envelope.payload()) {
            envelope
        } else {
            debug!(
                record_id = %envelope.record_id(),
                handler = handler.name(),
                "restoring payload from record"
            );
            let payload = self
                .handlers
                .payloads()
                .decode(record.event_type(), record.payload())?;
            Envelope::new(payload, event_type, envelope.record_id())
        };

        debug!(record_id = %envelope.record_id(), handler = handler.name(), "invoking handler");

        match self.config.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, handler.invoke(envelope)).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!(
                    "handler {} timed out after {:?}",
                    handler.name(),
                    limit
                )),
            },
            None => handler.invoke(envelope).await,
        }
    }

    async fn record_outcome(
        &self,
        id: RecordId,
        mut record: EventRecord,
        result: anyhow::Result<()>,
    ) -> OutboxResult<DispatchOutcome> {
        match result {
            Ok(()) => {
                record.mark_processed(Utc::now())?;
                self.store.save(record).await?;
                info!(record_id = %id, "event processed");
                Ok(DispatchOutcome::Processed)
            }
            Err(err) => {
                let max_retries = self.config.retry_bound();
                let reason = format!("{err:#}");
                let status = record.mark_handler_failed(reason.clone(), max_retries)?;
                let record = self.store.save(record).await?;
                let retry_count = record.retry_count();

                error!(
                    record_id = %id,
                    retry_count,
                    max_retries,
                    status = %status,
                    error = %reason,
                    "event processing failed"
                );

                Ok(match status {
                    EventStatus::Failed => DispatchOutcome::Failed { retry_count },
                    _ => DispatchOutcome::Retrying { retry_count },
                })
            }
        }
    }

    /// worker 池主循环：以 `dispatch_concurrency` 的并发消费通道，
    /// 在取消或通道关闭时退出，已取出的信封会处理完毕
    pub async fn run(self: Arc<Self>, rx: mpsc::Receiver<Envelope>, token: CancellationToken) {
        let concurrency = self.config.dispatch_concurrency;
        let envelopes = ReceiverStream::new(rx).take_until(token.cancelled_owned());

        envelopes
            .for_each_concurrent(Some(concurrency), |envelope| {
                let dispatcher = self.clone();
                async move {
                    dispatcher.dispatch(envelope).await;
                }
            })
            .await;

        debug!("dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventing::EventHandler;
    use crate::payload::{EventType, UserRegisteredPayload};
    use crate::persist::InMemoryEventRecordStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SpyHandler {
        calls: AtomicUsize,
        fail: bool,
        delay: Option<Duration>,
    }

    impl SpyHandler {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
                delay: None,
            })
        }
    }

    #[async_trait]
    impl EventHandler<UserRegisteredPayload> for SpyHandler {
        fn handler_name(&self) -> &str {
            "spy"
        }

        async fn handle(&self, payload: &UserRegisteredPayload) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                anyhow::bail!("Simulated failure for email: {}", payload.email);
            }
            Ok(())
        }
    }

    fn payload() -> UserRegisteredPayload {
        UserRegisteredPayload {
            username: "alice".into(),
            email: "alice@example.com".into(),
        }
    }

    async fn setup(
        handler: Arc<SpyHandler>,
        config: OutboxConfig,
    ) -> (Arc<InMemoryEventRecordStore>, Dispatcher, RecordId) {
        let store = Arc::new(InMemoryEventRecordStore::new());
        let record = store
            .save(EventRecord::new(
                EventType::USER_REGISTERED,
                serde_json::to_string(&payload()).unwrap(),
            ))
            .await
            .unwrap();
        let handlers = HandlerRegistry::new()
            .with::<UserRegisteredPayload, _>(handler)
            .unwrap();
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(handlers), config, InFlight::new());
        (store, dispatcher, record.id().unwrap())
    }

    #[tokio::test]
    async fn success_marks_processed() {
        let handler = SpyHandler::new(false);
        let (store, dispatcher, id) = setup(handler.clone(), OutboxConfig::default()).await;

        let outcome = dispatcher.dispatch(Envelope::typed(payload(), id)).await;
        assert_eq!(outcome, DispatchOutcome::Processed);

        let record = store.find_by_id(id).await.unwrap();
        assert_eq!(record.status(), EventStatus::Processed);
        assert!(record.processed_at().is_some());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_records_retry_with_message() {
        let handler = SpyHandler::new(true);
        let (store, dispatcher, id) = setup(handler, OutboxConfig::default()).await;

        let outcome = dispatcher.dispatch(Envelope::typed(payload(), id)).await;
        assert_eq!(outcome, DispatchOutcome::Retrying { retry_count: 1 });

        let record = store.find_by_id(id).await.unwrap();
        assert_eq!(record.status(), EventStatus::Retry);
        assert_eq!(record.retry_count(), 1);
        assert!(record.error_message().unwrap().contains("alice@example.com"));
        assert!(record.processed_at().is_none());
    }

    #[tokio::test]
    async fn last_allowed_failure_marks_failed() {
        let handler = SpyHandler::new(true);
        let config = OutboxConfig {
            max_retries: 1,
            ..Default::default()
        };
        let (store, dispatcher, id) = setup(handler, config).await;

        let outcome = dispatcher.dispatch(Envelope::typed(payload(), id)).await;
        assert_eq!(outcome, DispatchOutcome::Failed { retry_count: 1 });
        assert_eq!(
            store.find_by_id(id).await.unwrap().status(),
            EventStatus::Failed
        );
    }

    #[tokio::test]
    async fn guard_skips_records_past_pending() {
        let handler = SpyHandler::new(true);
        let (store, dispatcher, id) = setup(handler.clone(), OutboxConfig::default()).await;

        // 首次失败后记录处于 RETRY，重复投递的信封不得再调用处理器
        dispatcher.dispatch(Envelope::typed(payload(), id)).await;
        let before = store.find_by_id(id).await.unwrap();

        let outcome = dispatcher.dispatch(Envelope::typed(payload(), id)).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Skipped {
                status: EventStatus::Retry
            }
        );

        let after = store.find_by_id(id).await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(after.retry_count(), before.retry_count());
        assert_eq!(after.error_message(), before.error_message());
        assert_eq!(after.version(), before.version());
    }

    #[tokio::test]
    async fn guard_skips_failed_records() {
        let handler = SpyHandler::new(true);
        let config = OutboxConfig {
            max_retries: 1,
            ..Default::default()
        };
        let (store, dispatcher, id) = setup(handler.clone(), config).await;

        dispatcher.dispatch(Envelope::typed(payload(), id)).await;
        let before = store.find_by_id(id).await.unwrap();
        assert_eq!(before.status(), EventStatus::Failed);

        let outcome = dispatcher.dispatch(Envelope::typed(payload(), id)).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Skipped {
                status: EventStatus::Failed
            }
        );

        let after = store.find_by_id(id).await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(after.status(), EventStatus::Failed);
        assert_eq!(after.retry_count(), before.retry_count());
        assert_eq!(after.error_message(), before.error_message());
        assert_eq!(after.version(), before.version());
    }

    #[tokio::test]
    async fn untyped_payload_is_restored_from_record() {
        let handler = SpyHandler::new(false);
        let (store, dispatcher, id) = setup(handler.clone(), OutboxConfig::default()).await;

        // 以 JSON 值而非处理器的负载类型发布
        let raw = serde_json::to_value(payload()).unwrap();
        let outcome = dispatcher
            .dispatch(Envelope::new(Arc::new(raw), EventType::USER_REGISTERED, id))
            .await;

        assert_eq!(outcome, DispatchOutcome::Processed);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        let record = store.find_by_id(id).await.unwrap();
        assert_eq!(record.status(), EventStatus::Processed);
        assert_eq!(record.retry_count(), 0);
    }

    #[tokio::test]
    async fn dispatch_releases_in_flight_entry() {
        let handler = SpyHandler::new(true);
        let (_store, dispatcher, id) = setup(handler, OutboxConfig::default()).await;

        dispatcher.in_flight.enter(id);
        dispatcher.dispatch(Envelope::typed(payload(), id)).await;
        assert!(!dispatcher.in_flight.contains(id));

        // 被守卫跳过的信封同样释放
        dispatcher.in_flight.enter(id);
        dispatcher.dispatch(Envelope::typed(payload(), id)).await;
        assert!(dispatcher.in_flight.is_empty());
    }

    #[tokio::test]
    async fn missing_record_is_dropped() {
        let handler = SpyHandler::new(false);
        let (_store, dispatcher, _id) = setup(handler.clone(), OutboxConfig::default()).await;

        let outcome = dispatcher
            .dispatch(Envelope::typed(payload(), RecordId(999)))
            .await;
        assert_eq!(outcome, DispatchOutcome::Dropped);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unregistered_type_follows_failure_path() {
        let store = Arc::new(InMemoryEventRecordStore::new());
        let record = store
            .save(EventRecord::new(EventType::ORDER_CREATED, "{}".into()))
            .await
            .unwrap();
        let id = record.id().unwrap();
        let dispatcher = Dispatcher::new(
            store.clone(),
            Arc::new(HandlerRegistry::new()),
            OutboxConfig::default(),
            InFlight::new(),
        );

        let outcome = dispatcher
            .dispatch(Envelope::new(
                Arc::new(()),
                EventType::ORDER_CREATED,
                id,
            ))
            .await;
        assert_eq!(outcome, DispatchOutcome::Retrying { retry_count: 1 });
        assert!(
            store
                .find_by_id(id)
                .await
                .unwrap()
                .error_message()
                .unwrap()
                .contains("no handler registered")
        );
    }

    #[tokio::test]
    async fn handler_timeout_counts_as_failure() {
        let handler = Arc::new(SpyHandler {
            calls: AtomicUsize::new(0),
            fail: false,
            delay: Some(Duration::from_millis(200)),
        });
        let config = OutboxConfig {
            handler_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let (store, dispatcher, id) = setup(handler, config).await;

        let outcome = dispatcher.dispatch(Envelope::typed(payload(), id)).await;
        assert_eq!(outcome, DispatchOutcome::Retrying { retry_count: 1 });
        assert!(
            store
                .find_by_id(id)
                .await
                .unwrap()
                .error_message()
                .unwrap()
                .contains("timed out")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_drains_channel_until_closed() {
        let handler = SpyHandler::new(false);
        let (store, dispatcher, id) = setup(handler.clone(), OutboxConfig::default()).await;
        let (tx, rx) = mpsc::channel(8);

        let worker = tokio::spawn(Arc::new(dispatcher).run(rx, CancellationToken::new()));
        tx.send(Envelope::typed(payload(), id)).await.unwrap();
        drop(tx);
        worker.await.unwrap();

        assert_eq!(
            store.find_by_id(id).await.unwrap().status(),
            EventStatus::Processed
        );
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }
}
