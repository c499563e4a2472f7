//! 事件子系统（eventing）
//!
//! Outbox 的运行时部分：
//! - `EventPublisher`：持久化记录后投递信封，并提供重试与补偿的重新投递；
//! - `Dispatcher`：消费信封，幂等守卫后按事件类型调用处理器并写回结果；
//! - `RetryScheduler`：按指数退避挑选到期的 RETRY 记录交给发布器重试；
//! - `EventHandler`/`HandlerRegistry`：事件类型到业务处理器的映射；
//! - `InFlight`：本进程内在途信封的计数，供 PENDING 补偿判断是否真的丢失了投递；
//! - `OutboxEngine`：装配以上组件并管理其生命周期。
//!
pub mod dispatcher;
pub mod engine;
pub mod handler;
pub mod inflight;
pub mod publisher;
pub mod scheduler;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use engine::{EngineHandle, OutboxEngine};
pub use handler::{EventHandler, HandlerRegistry, RegisteredHandler};
pub use inflight::InFlight;
pub use publisher::{EventPublisher, RetryOutcome};
pub use scheduler::{RetryScheduler, TickReport};
