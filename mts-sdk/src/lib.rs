//! MTS 投注票据提交 SDK（mts-sdk）
//!
//! 在异步发布/订阅型消息代理之上，为票据提交提供“请求-响应”语义：
//! - 票据与响应的值类型（`ticket`）与关联标识生成（`correlation`）
//! - 按消息类型的通道拓扑（`topology`）：交换机、路由键、回复路径
//! - 消息层（`messaging`）：发布/消费抽象、待响应表、关联引擎与通知
//!
//! 本 crate 不绑定具体的消息中间件实现；通过 `TicketPublisher` 与
//! `ResponseConsumer` 两个接口接入任意传输层，内置 `InMemoryBroker`
//! 供测试与本地演示使用。
//!
//! 典型用法：
//! 1. 构建 `SdkConfig` 并由其派生 `ChannelTopology`；
//! 2. 实现（或复用内存版）发布与消费通道；
//! 3. 组装 `CorrelationEngine` 并 `start()`；
//! 4. 通过 `send`/`send_blocking` 提交票据，经监听器或返回值取得结果，
//!    必要时对响应调用 `acknowledge`。
//!
pub mod config;
pub mod correlation;
pub mod error;
pub mod messaging;
pub mod ticket;
pub mod topology;
