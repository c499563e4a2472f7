//! 事件负载（payload）
//!
//! 一条记录只携带不透明的 JSON 文本，具体结构由 `EventType` 决定：
//! - `EventType`：开放的事件类型标签；
//! - `EventPayload`：把业务负载结构体绑定到其类型标签；
//! - `PayloadRegistry`：类型标签到反序列化函数的静态映射，用于重试时还原负载；
//! - `builtin`：内置的两类业务负载。
//!
mod builtin;
mod registry;

pub use builtin::{OrderCreatedPayload, UserRegisteredPayload};
pub use registry::{AnyPayload, PayloadRegistry};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{borrow::Cow, fmt};

/// 事件类型标签
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(Cow<'static, str>);

impl EventType {
    pub const USER_REGISTERED: EventType = EventType::from_static("USER_REGISTERED");
    pub const ORDER_CREATED: EventType = EventType::from_static("ORDER_CREATED");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 业务负载：可序列化，并声明其所属的事件类型
pub trait EventPayload: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    const EVENT_TYPE: EventType;
}
