//! 持久化（persist）
//!
//! 定义事件记录的存储协议与内存实现：
//! - `EventRecordStore`：按记录粒度原子保存，以及按状态/重试次数/创建时间查询；
//! - `InMemoryEventRecordStore`：基于 `DashMap` 的实现，适用于测试、示例与单进程部署。
//!
//! 存储层不含业务逻辑；具体持久化后端（如 Postgres）由上层实现同一协议并注入。
//!
mod inmemory;
mod record_store;

pub use inmemory::InMemoryEventRecordStore;
pub use record_store::EventRecordStore;
