//! 事务性 Outbox 基础库（outbox-domain）
//!
//! 提供“先持久化、后投递”的事件处理构件：
//! - 事件记录（`event_record`）及其状态机；
//! - 记录仓储协议与内存实现（`persist`）；
//! - 负载类型与注册表（`payload`）、投递信封（`envelope`）；
//! - 发布器、分发器、重试调度器与引擎（`eventing`）；
//! - 配置（`config`）、错误（`error`）与日志初始化（`telemetry`）。
//!
//! 保证至少一次分发：处理器需幂等，或其副作用可安全重放。
//!
//! 典型用法：
//! 1. 为每种负载实现 `EventHandler<P>` 并注册到 `HandlerRegistry`；
//! 2. 选择 `EventRecordStore` 实现，读取 `OutboxConfig`；
//! 3. 通过 `OutboxEngine::builder()` 启动引擎，用句柄上的发布器发布事件。
//!
pub mod config;
pub mod envelope;
pub mod error;
pub mod event_record;
pub mod eventing;
pub mod payload;
pub mod persist;
pub mod telemetry;
