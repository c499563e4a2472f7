use crate::error::OutboxResult as Result;
use crate::event_record::{EventRecord, EventStatus, RecordId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// 事件记录仓储
///
/// `save` 对单条记录原子生效：无 id 时创建并分配 `id`/`created_at`，否则更新；
/// 两种情况都会刷新 `updated_at` 并递增 `version`。更新时若调用方持有的版本已过期，
/// 返回 `VersionConflict`。查询结果按 id 升序。
#[async_trait]
pub trait EventRecordStore: Send + Sync {
    async fn save(&self, record: EventRecord) -> Result<EventRecord>;

    /// 不存在时返回 `NotFound`
    async fn find_by_id(&self, id: RecordId) -> Result<EventRecord>;

    async fn find_by_status(&self, status: EventStatus) -> Result<Vec<EventRecord>>;

    async fn find_by_status_and_retry_count_less_than(
        &self,
        status: EventStatus,
        bound: u32,
    ) -> Result<Vec<EventRecord>>;

    async fn find_by_status_and_created_at_after(
        &self,
        status: EventStatus,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>>;
}

#[async_trait]
impl<T> EventRecordStore for Arc<T>
where
    T: EventRecordStore + ?Sized,
{
    async fn save(&self, record: EventRecord) -> Result<EventRecord> {
        (**self).save(record).await
    }

    async fn find_by_id(&self, id: RecordId) -> Result<EventRecord> {
        (**self).find_by_id(id).await
    }

    async fn find_by_status(&self, status: EventStatus) -> Result<Vec<EventRecord>> {
        (**self).find_by_status(status).await
    }

    async fn find_by_status_and_retry_count_less_than(
        &self,
        status: EventStatus,
        bound: u32,
    ) -> Result<Vec<EventRecord>> {
        (**self)
            .find_by_status_and_retry_count_less_than(status, bound)
            .await
    }

    async fn find_by_status_and_created_at_after(
        &self,
        status: EventStatus,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>> {
        (**self)
            .find_by_status_and_created_at_after(status, timestamp)
            .await
    }
}
