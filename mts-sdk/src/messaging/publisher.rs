//! 票据发布通道（TicketPublisher）协议
//!
//! 将编码后的报文连同路由元数据交给代理；结果以 `PublishOutcome`
//! 报告，拒绝原因区分通道关闭、本地队列满与代理否定应答。
//! 重试策略不在本层：连接管理属外部协作方，这里只看开/关与成败。
//!
use async_trait::async_trait;
use thiserror::Error;

use crate::topology::ChannelTopologyEntry;

/// 发布被拒绝的原因
#[derive(Debug, Clone, Error)]
pub enum PublishFailure {
    #[error("broker channel is closed")]
    ChannelClosed,
    #[error("local publish queue at capacity")]
    QueueFull,
    #[error("broker negative acknowledgement: {reason}")]
    Nacked { reason: String },
}

/// 发布结果：接受或带原因的拒绝
#[derive(Debug, Clone)]
pub enum PublishOutcome {
    Accepted,
    Rejected(PublishFailure),
}

impl PublishOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, PublishOutcome::Accepted)
    }
}

/// 发布通道：按拓扑条目发送一条报文
///
/// `reply_routing_key` 非空时必须随消息头携带，告知代理响应应
/// 发布到哪条路由；`correlation_id` 写入代理原生的关联头。
#[async_trait]
pub trait TicketPublisher: Send + Sync {
    async fn publish(
        &self,
        body: &[u8],
        entry: &ChannelTopologyEntry,
        correlation_id: &str,
        reply_routing_key: Option<&str>,
    ) -> PublishOutcome;

    /// 通道当前是否可用（连接管理由外部负责）
    fn is_open(&self) -> bool;
}
