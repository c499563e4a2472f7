//! 领域层统一错误定义
//!
//! 覆盖 outbox 的最小必要错误集：序列化/反序列化、存储、投递通道、处理器与配置，
//! 便于各实现层统一转换为 `OutboxError`。
//!
use crate::event_record::{EventStatus, RecordId};
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum OutboxError {
    // --- 序列化 ---
    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
    #[error("deserialization error: type={event_type}, reason={reason}")]
    Deserialization { event_type: String, reason: String },
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    // --- 处理器 ---
    #[error("event handler error: handler={handler}, reason={reason}")]
    Handler { handler: String, reason: String },
    #[error("no handler registered for event type: {0}")]
    HandlerNotFound(String),
    #[error("handler already registered for event type: {0}")]
    HandlerAlreadyRegistered(String),
    #[error("payload type mismatch: type={event_type}, expected={expected}")]
    PayloadTypeMismatch {
        event_type: String,
        expected: &'static str,
    },

    // --- 存储 ---
    #[error("event record not found: id={id}")]
    NotFound { id: RecordId },
    #[error("version conflict: id={id}, expected={expected}, actual={actual}")]
    VersionConflict {
        id: RecordId,
        expected: u64,
        actual: u64,
    },
    #[error("invalid transition: id={id:?}, from={from}, to={to}")]
    InvalidTransition {
        id: Option<RecordId>,
        from: EventStatus,
        to: EventStatus,
    },
    #[error("record store error: {reason}")]
    Store { reason: String },

    // --- 投递 ---
    #[error("dispatch channel closed")]
    DispatchClosed,

    // --- 配置 ---
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },
}

/// 统一 Result 类型别名
pub type OutboxResult<T> = Result<T, OutboxError>;

impl From<std::num::ParseIntError> for OutboxError {
    fn from(err: std::num::ParseIntError) -> Self {
        OutboxError::InvalidConfig {
            reason: err.to_string(),
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for OutboxError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        OutboxError::DispatchClosed
    }
}
