//! 投递信封（Envelope）
//!
//! 发布器交给分发器的内存消息，不做持久化。信封本身不携带状态，
//! `record_id` 是回到持久化记录的唯一关联键。
//!
use crate::event_record::RecordId;
use crate::payload::{AnyPayload, EventPayload, EventType};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct Envelope {
    payload: AnyPayload,
    event_type: EventType,
    timestamp: DateTime<Utc>,
    record_id: RecordId,
}

impl Envelope {
    pub fn new(payload: AnyPayload, event_type: EventType, record_id: RecordId) -> Self {
        Self {
            payload,
            event_type,
            timestamp: Utc::now(),
            record_id,
        }
    }

    /// 以强类型负载构建信封，事件类型取自负载声明
    pub fn typed<P: EventPayload>(payload: P, record_id: RecordId) -> Self {
        Self::new(Arc::new(payload), P::EVENT_TYPE, record_id)
    }

    pub fn payload(&self) -> &AnyPayload {
        &self.payload
    }

    /// 尝试以指定类型读取负载
    pub fn payload_as<P: 'static>(&self) -> Option<&P> {
        self.payload.downcast_ref::<P>()
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn record_id(&self) -> RecordId {
        self.record_id
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("event_type", &self.event_type)
            .field("timestamp", &self.timestamp)
            .field("record_id", &self.record_id)
            .finish_non_exhaustive()
    }
}
