//! 负载注册表（PayloadRegistry）
//!
//! 以事件类型为键保存反序列化函数，重试时据此把记录中的 JSON 还原为强类型负载，
//! 并以类型擦除（`Any`）的形式放入信封，由处理器侧再向下转型。
//!
use super::{EventPayload, EventType, OrderCreatedPayload, UserRegisteredPayload};
use crate::error::{OutboxError, OutboxResult};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// 类型擦除后的负载
pub type AnyPayload = Arc<dyn Any + Send + Sync>;

type PayloadDecoder = fn(&str) -> Result<AnyPayload, serde_json::Error>;

fn decode<P: EventPayload>(raw: &str) -> Result<AnyPayload, serde_json::Error> {
    let payload: P = serde_json::from_str(raw)?;
    Ok(Arc::new(payload))
}

#[derive(Clone, Default)]
pub struct PayloadRegistry {
    decoders: HashMap<EventType, PayloadDecoder>,
}

impl PayloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置内置负载类型的注册表
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register::<UserRegisteredPayload>();
        registry.register::<OrderCreatedPayload>();
        registry
    }

    pub fn register<P: EventPayload>(&mut self) {
        self.decoders.insert(P::EVENT_TYPE, decode::<P>);
    }

    pub fn contains(&self, event_type: &EventType) -> bool {
        self.decoders.contains_key(event_type)
    }

    pub fn event_types(&self) -> Vec<EventType> {
        let mut types: Vec<EventType> = self.decoders.keys().cloned().collect();
        types.sort();
        types
    }

    /// 按事件类型还原负载；未注册类型或负载格式错误均视为反序列化失败
    pub fn decode(&self, event_type: &EventType, raw: &str) -> OutboxResult<AnyPayload> {
        let decoder = self
            .decoders
            .get(event_type)
            .ok_or_else(|| OutboxError::UnknownEventType(event_type.to_string()))?;

        decoder(raw).map_err(|e| OutboxError::Deserialization {
            event_type: event_type.to_string(),
            reason: e.to_string(),
        })
    }
}
