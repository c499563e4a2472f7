//! 内存版记录仓储（InMemoryEventRecordStore）
//!
//! 以 `DashMap` 分片锁保证单条记录的读改写原子性，id 由自增计数器分配。
//! 进程退出即丢失数据，仅用于测试、示例与本地开发。
//!
use super::EventRecordStore;
use crate::error::{OutboxError, OutboxResult as Result};
use crate::event_record::{EventRecord, EventStatus, RecordId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Default)]
pub struct InMemoryEventRecordStore {
    records: DashMap<RecordId, EventRecord>,
    next_id: AtomicI64,
}

impl InMemoryEventRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn select<F>(&self, predicate: F) -> Vec<EventRecord>
    where
        F: Fn(&EventRecord) -> bool,
    {
        let mut out: Vec<EventRecord> = self
            .records
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        out.sort_by_key(|r| r.id());
        out
    }
}

#[async_trait]
impl EventRecordStore for InMemoryEventRecordStore {
    async fn save(&self, mut record: EventRecord) -> Result<EventRecord> {
        let now = Utc::now();

        let Some(id) = record.id() else {
            let id = RecordId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            record.assign_identity(id, now);
            record.stamp(now, 1);
            self.records.insert(id, record.clone());
            return Ok(record);
        };

        let mut current = self
            .records
            .get_mut(&id)
            .ok_or(OutboxError::NotFound { id })?;

        if current.version() != record.version() {
            return Err(OutboxError::VersionConflict {
                id,
                expected: record.version(),
                actual: current.version(),
            });
        }

        record.stamp(now, current.version() + 1);
        *current = record.clone();
        Ok(record)
    }

    async fn find_by_id(&self, id: RecordId) -> Result<EventRecord> {
        self.records
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(OutboxError::NotFound { id })
    }

    async fn find_by_status(&self, status: EventStatus) -> Result<Vec<EventRecord>> {
        Ok(self.select(|r| r.status() == status))
    }

    async fn find_by_status_and_retry_count_less_than(
        &self,
        status: EventStatus,
        bound: u32,
    ) -> Result<Vec<EventRecord>> {
        Ok(self.select(|r| r.status() == status && r.retry_count() < bound))
    }

    async fn find_by_status_and_created_at_after(
        &self,
        status: EventStatus,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>> {
        Ok(self.select(|r| r.status() == status && r.created_at() > timestamp))
    }
}
