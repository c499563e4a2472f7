//! 事件记录（EventRecord）
//!
//! Outbox 的持久化工作单元。状态只能沿以下路径推进：
//! `PENDING → PROCESSED | RETRY | FAILED`，`RETRY → PENDING | FAILED`；
//! `PROCESSED` 与 `FAILED` 为终态。状态变更只通过本模块的方法完成，
//! `id`/`created_at`/`updated_at`/`version` 由存储层维护。
//!
use crate::error::{OutboxError, OutboxResult};
use crate::payload::EventType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 记录标识，由存储层在首次保存时分配
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Pending,
    Processed,
    Failed,
    Retry,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "PENDING",
            EventStatus::Processed => "PROCESSED",
            EventStatus::Failed => "FAILED",
            EventStatus::Retry => "RETRY",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Processed | EventStatus::Failed)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// 存储层分配的标识；未保存时为空
    id: Option<RecordId>,
    /// 事件类型，决定负载结构与处理器
    event_type: EventType,
    /// 序列化后的业务负载（JSON 文本）
    payload: String,
    status: EventStatus,
    /// 失败次数，仅在处理器失败时递增
    retry_count: u32,
    /// 最近一次失败的原因
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    /// 每次变更时刷新，作为退避计算的基准
    updated_at: DateTime<Utc>,
    /// 仅在进入 PROCESSED 时设置
    processed_at: Option<DateTime<Utc>>,
    /// 乐观并发版本，由存储层在每次保存时递增
    version: u64,
}

impl EventRecord {
    /// 新建一条待处理记录（`PENDING`，`retry_count = 0`）
    pub fn new(event_type: EventType, payload: String) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            event_type,
            payload,
            status: EventStatus::Pending,
            retry_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            version: 0,
        }
    }

    pub fn id(&self) -> Option<RecordId> {
        self.id
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn status(&self) -> EventStatus {
        self.status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// 处理成功：`PENDING → PROCESSED`
    pub fn mark_processed(&mut self, now: DateTime<Utc>) -> OutboxResult<()> {
        self.ensure_status(&[EventStatus::Pending], EventStatus::Processed)?;
        self.status = EventStatus::Processed;
        self.processed_at = Some(now);
        Ok(())
    }

    /// 处理失败：计数加一，达到 `max_retries` 时进入 FAILED，否则进入 RETRY
    pub fn mark_handler_failed(
        &mut self,
        reason: impl Into<String>,
        max_retries: u32,
    ) -> OutboxResult<EventStatus> {
        let next = self.retry_count.saturating_add(1);
        let to = if next >= max_retries {
            EventStatus::Failed
        } else {
            EventStatus::Retry
        };
        self.ensure_status(&[EventStatus::Pending], to)?;
        self.retry_count = next;
        self.status = to;
        self.error_message = Some(reason.into());
        Ok(to)
    }

    /// 重新投递前复位：`RETRY → PENDING`
    pub fn mark_pending(&mut self) -> OutboxResult<()> {
        self.ensure_status(&[EventStatus::Retry], EventStatus::Pending)?;
        self.status = EventStatus::Pending;
        Ok(())
    }

    /// 不可恢复的失败（如负载无法反序列化），不增加重试计数
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> OutboxResult<()> {
        self.ensure_status(
            &[EventStatus::Pending, EventStatus::Retry],
            EventStatus::Failed,
        )?;
        self.status = EventStatus::Failed;
        self.error_message = Some(reason.into());
        Ok(())
    }

    fn ensure_status(&self, allowed: &[EventStatus], to: EventStatus) -> OutboxResult<()> {
        if allowed.contains(&self.status) {
            return Ok(());
        }
        Err(OutboxError::InvalidTransition {
            id: self.id,
            from: self.status,
            to,
        })
    }

    // --- 以下仅供存储层维护 ---

    pub(crate) fn assign_identity(&mut self, id: RecordId, now: DateTime<Utc>) {
        self.id = Some(id);
        self.created_at = now;
    }

    pub(crate) fn stamp(&mut self, now: DateTime<Utc>, version: u64) {
        self.updated_at = now;
        self.version = version;
    }
}
