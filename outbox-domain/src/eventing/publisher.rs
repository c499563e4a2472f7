//! 事件发布器（EventPublisher）
//!
//! Outbox 的写入端：先持久化记录并等待提交完成，再把信封交给分发通道。
//! 分发通道中的每个信封都对应一条已提交的记录；提交后、投递前的崩溃最多丢失投递触发，
//! 由调度器的 PENDING 补偿恢复。
//!
//! 每个送入通道的信封都登记在 `InFlight` 中，直到分发器处理完毕。
//!
use super::InFlight;
use crate::envelope::Envelope;
use crate::error::{OutboxError, OutboxResult};
use crate::event_record::{EventRecord, EventStatus, RecordId};
use crate::payload::{AnyPayload, EventPayload, EventType, PayloadRegistry};
use crate::persist::EventRecordStore;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// 重试路径的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// 记录已复位为 PENDING 并重新投递
    Redispatched,
    /// 负载无法还原，记录已置为 FAILED
    Abandoned,
}

#[derive(Clone)]
pub struct EventPublisher {
    store: Arc<dyn EventRecordStore>,
    payloads: Arc<PayloadRegistry>,
    dispatch: mpsc::Sender<Envelope>,
    in_flight: InFlight,
}

impl EventPublisher {
    pub fn new(
        store: Arc<dyn EventRecordStore>,
        payloads: Arc<PayloadRegistry>,
        dispatch: mpsc::Sender<Envelope>,
        in_flight: InFlight,
    ) -> Self {
        Self {
            store,
            payloads,
            dispatch,
            in_flight,
        }
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// 发布一条事件，返回新记录的 id
    ///
    /// 只有负载序列化失败会返回错误，此时不会创建记录也不会投递。
    /// 记录提交后若分发通道已关闭，仅记录告警，该记录保持 PENDING 等待补偿。
    pub async fn publish<P>(&self, payload: P, event_type: EventType) -> OutboxResult<RecordId>
    where
        P: Serialize + Send + Sync + 'static,
    {
        let raw = serde_json::to_string(&payload).inspect_err(|e| {
            error!(event_type = %event_type, error = %e, "failed to serialize payload");
        })?;

        let record = self
            .store
            .save(EventRecord::new(event_type.clone(), raw))
            .await?;
        let id = record_id(&record)?;

        // 提交完成后才交给分发通道
        let envelope = Envelope::new(Arc::new(payload), event_type.clone(), id);
        if self.send(envelope).await.is_err() {
            warn!(record_id = %id, event_type = %event_type, "dispatch channel closed; record left pending");
        } else {
            info!(record_id = %id, event_type = %event_type, "published event");
        }

        Ok(id)
    }

    /// 以负载声明的事件类型发布
    pub async fn publish_event<P: EventPayload>(&self, payload: P) -> OutboxResult<RecordId> {
        self.publish(payload, P::EVENT_TYPE).await
    }

    /// 重试一条 RETRY 记录：还原负载 → 复位为 PENDING 并保存 → 以同一 id 重新投递
    ///
    /// 负载无法还原（未知类型或格式错误）时记录直接置为 FAILED，不再投递。
    pub async fn retry(&self, mut record: EventRecord) -> OutboxResult<RetryOutcome> {
        let id = record_id(&record)?;

        let Some(payload) = self.decode_or_fail(&mut record).await? else {
            return Ok(RetryOutcome::Abandoned);
        };

        record.mark_pending()?;
        let record = self.store.save(record).await?;

        self.send(Envelope::new(payload, record.event_type().clone(), id)).await?;

        info!(
            record_id = %id,
            event_type = %record.event_type(),
            retry_count = record.retry_count(),
            "retrying event"
        );
        Ok(RetryOutcome::Redispatched)
    }

    /// 重新投递一条滞留的 PENDING 记录，不改变其状态
    ///
    /// 投递前先原样保存一次以认领该记录：刷新 `updated_at` 使滞留计时重新开始，
    /// 版本冲突说明另一写入方已推进该记录，此时返回错误且不投递。
    pub async fn redispatch(&self, mut record: EventRecord) -> OutboxResult<RetryOutcome> {
        let id = record_id(&record)?;
        if record.status() != EventStatus::Pending {
            return Err(OutboxError::InvalidTransition {
                id: Some(id),
                from: record.status(),
                to: EventStatus::Pending,
            });
        }

        let Some(payload) = self.decode_or_fail(&mut record).await? else {
            return Ok(RetryOutcome::Abandoned);
        };

        let record = self.store.save(record).await?;
        self.send(Envelope::new(payload, record.event_type().clone(), id)).await?;

        info!(record_id = %id, event_type = %record.event_type(), "redispatched pending event");
        Ok(RetryOutcome::Redispatched)
    }

    async fn send(&self, envelope: Envelope) -> OutboxResult<()> {
        let id = envelope.record_id();
        self.in_flight.enter(id);
        if let Err(err) = self.dispatch.send(envelope).await {
            self.in_flight.leave(id);
            return Err(err.into());
        }
        Ok(())
    }

    async fn decode_or_fail(&self, record: &mut EventRecord) -> OutboxResult<Option<AnyPayload>> {
        match self.payloads.decode(record.event_type(), record.payload()) {
            Ok(payload) => Ok(Some(payload)),
            Err(err) => {
                error!(
                    record_id = ?record.id(),
                    event_type = %record.event_type(),
                    error = %err,
                    "failed to restore payload; marking event failed"
                );
                record.mark_failed(format!("Retry failed: {err}"))?;
                self.store.save(record.clone()).await?;
                Ok(None)
            }
        }
    }
}

fn record_id(record: &EventRecord) -> OutboxResult<RecordId> {
    record.id().ok_or_else(|| OutboxError::Store {
        reason: "record has no id".to_string(),
    })
}
