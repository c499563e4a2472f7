//! 重试调度器（RetryScheduler）
//!
//! 由引擎按固定周期驱动，每次扫描：
//! - 状态为 RETRY 且 `retry_count < retry_bound` 的记录，按 `base_delay * 2^retry_count`
//!   计算退避，到期的交给发布器的重试路径；
//! - 滞留过久的 PENDING 记录（提交后丢失投递触发），原样重新投递；
//!   本进程内仍有信封在途（排队中或处理器运行中）的记录不算滞留。
//!
//! 单条记录的错误只记日志，不中断本轮其余记录的处理。
//!
use crate::config::OutboxConfig;
use crate::error::OutboxResult;
use crate::event_record::{EventRecord, EventStatus};
use crate::eventing::{EventPublisher, RetryOutcome};
use crate::persist::EventRecordStore;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// 单次扫描的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// 满足状态与次数条件的 RETRY 记录数
    pub candidates: usize,
    pub retried: usize,
    /// 退避未到期而跳过
    pub not_due: usize,
    /// 负载无法还原而置为 FAILED
    pub abandoned: usize,
    /// 重新投递的滞留 PENDING 记录数
    pub recovered: usize,
    pub errors: usize,
}

pub struct RetryScheduler {
    store: Arc<dyn EventRecordStore>,
    publisher: EventPublisher,
    config: OutboxConfig,
}

impl RetryScheduler {
    pub fn new(
        store: Arc<dyn EventRecordStore>,
        publisher: EventPublisher,
        config: OutboxConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// 记录在 `now` 时刻是否已过退避期
    pub fn is_due(&self, record: &EventRecord, now: DateTime<Utc>) -> bool {
        due_at(record.updated_at(), self.config.backoff_delay(record.retry_count()))
            .is_some_and(|due| due <= now)
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        let candidates = match self
            .store
            .find_by_status_and_retry_count_less_than(EventStatus::Retry, self.config.retry_bound())
            .await
        {
            Ok(candidates) => candidates,
            Err(err) => {
                error!(error = %err, "failed to query events for retry");
                report.errors += 1;
                return report;
            }
        };

        report.candidates = candidates.len();
        info!("found {} events to retry", candidates.len());

        for record in candidates {
            let id = record.id();
            if !self.is_due(&record, now) {
                debug!(record_id = ?id, retry_count = record.retry_count(), "not ready for retry yet");
                report.not_due += 1;
                continue;
            }

            match self.publisher.retry(record).await {
                Ok(RetryOutcome::Redispatched) => report.retried += 1,
                Ok(RetryOutcome::Abandoned) => report.abandoned += 1,
                Err(err) => {
                    error!(record_id = ?id, error = %err, "failed to republish event");
                    report.errors += 1;
                }
            }
        }

        if let Some(after) = self.config.pending_recovery_after {
            self.recover_pending(now, after, &mut report).await;
        }

        report
    }

    async fn recover_pending(&self, now: DateTime<Utc>, after: Duration, report: &mut TickReport) {
        let pending = match self.store.find_by_status(EventStatus::Pending).await {
            Ok(pending) => pending,
            Err(err) => {
                error!(error = %err, "failed to query pending events");
                report.errors += 1;
                return;
            }
        };

        for record in pending {
            let stale = due_at(record.updated_at(), after).is_some_and(|due| due <= now);
            if !stale {
                continue;
            }

            let id = record.id();
            if id.is_some_and(|id| self.publisher.in_flight().contains(id)) {
                debug!(record_id = ?id, "pending event still in flight");
                continue;
            }

            match self.publisher.redispatch(record).await {
                Ok(RetryOutcome::Redispatched) => report.recovered += 1,
                Ok(RetryOutcome::Abandoned) => report.abandoned += 1,
                Err(err) => {
                    error!(record_id = ?id, error = %err, "failed to redispatch pending event");
                    report.errors += 1;
                }
            }
        }
    }

    /// 自 `since` 以来创建且已永久失败的记录
    pub async fn recent_failures(&self, since: DateTime<Utc>) -> OutboxResult<Vec<EventRecord>> {
        self.store
            .find_by_status_and_created_at_after(EventStatus::Failed, since)
            .await
    }
}

fn due_at(updated_at: DateTime<Utc>, delay: Duration) -> Option<DateTime<Utc>> {
    let delay = TimeDelta::from_std(delay).ok()?;
    updated_at.checked_add_signed(delay)
}
