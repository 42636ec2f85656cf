//! SDK 统一错误定义
//!
//! 聚焦配置校验、发布/消费通道、响应关联与超时等最小必要集合，
//! 四种终态（响应、超时、发送失败、引擎关闭）各自对应独立变体，
//! 便于调用方精确区分处理。
//!
use thiserror::Error;

/// 统一错误类型（基础库最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SdkError {
    // --- 配置/入参 ---
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },
    #[error("invalid ticket: {reason}")]
    InvalidTicket { reason: String },

    // --- 提交生命周期终态 ---
    #[error("duplicate ticket: id={ticket_id} is still awaiting its response")]
    DuplicateTicket { ticket_id: String },
    #[error("send failed: ticket={ticket_id}, reason={reason}")]
    SendFailed { ticket_id: String, reason: String },
    #[error("response timeout: ticket={ticket_id}")]
    ResponseTimeout { ticket_id: String },
    #[error("engine closed: ticket={ticket_id}")]
    EngineClosed { ticket_id: String },

    // --- 通道/解析 ---
    /// 传输适配器的通道级故障（订阅建立失败、连接中断等）。
    /// 内存实现不产生该变体，供真实代理适配器使用
    #[error("channel error: {reason}")]
    Channel { reason: String },
    #[error("parse error: {reason}")]
    Parse { reason: String },
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
}

/// 统一 Result 类型别名
pub type SdkResult<T> = Result<T, SdkError>;
