//! 消息层（messaging）
//!
//! 在发布/订阅代理之上合成“请求-响应”语义：
//! - `TicketPublisher` / `ResponseConsumer`：传输层接入点；
//! - `PendingRequestTable`：并发安全的待响应表，单次完成；
//! - `TicketListener`：异步模式下的结果通知；
//! - `CorrelationEngine`：提交/匹配/超时/确认的编排中枢；
//! - `InMemoryBroker`：内存实现，供测试与演示。
//!
pub mod broker_inmemory;
pub mod consumer;
pub mod engine;
pub mod listener;
pub mod pending;
pub mod publisher;

pub use broker_inmemory::InMemoryBroker;
pub use consumer::{DeliveredFrame, ResponseConsumer};
pub use engine::{CorrelationEngine, EngineHandle};
pub use listener::TicketListener;
pub use pending::{PendingRequestTable, PendingTicket, TicketOutcome};
pub use publisher::{PublishFailure, PublishOutcome, TicketPublisher};
