//! 内存版代理（InMemoryBroker）
//!
//! 基于 `tokio::sync::broadcast` 的轻量代理，同时实现发布与消费两个
//! 协议，按交换机路由：fanout 无视路由键投递，topic 要求帧的路由键
//! 命中订阅条目的绑定键。典型用途：测试环境、示例与本地开发。
//!
//! 另外模拟两类发布失败：`close()` 之后一律 ChannelClosed；
//! 配置了出站队列上限时，占满且等待超时即 QueueFull。
//!
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::{Semaphore, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use crate::config::SdkConfig;
use crate::error::SdkResult;
use crate::messaging::consumer::{DeliveredFrame, ResponseConsumer};
use crate::messaging::publisher::{PublishFailure, PublishOutcome, TicketPublisher};
use crate::topology::{ChannelTopologyEntry, ExchangeKind};

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// 内存代理：交换机名 -> 广播通道
pub struct InMemoryBroker {
    exchanges: DashMap<String, broadcast::Sender<DeliveredFrame>>,
    open: AtomicBool,
    outbound_slots: Option<Arc<Semaphore>>,
    publish_queue_timeout: Duration,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_queue_limit(0, Duration::from_secs(15))
    }

    /// 按 SDK 配置取发布队列限制与入队等待上限
    pub fn from_config(cfg: &SdkConfig) -> Self {
        Self::with_queue_limit(cfg.publish_queue_limit, cfg.publish_queue_timeout)
    }

    /// `queue_limit` 为 0 表示出站不限流
    pub fn with_queue_limit(queue_limit: usize, publish_queue_timeout: Duration) -> Self {
        Self {
            exchanges: DashMap::new(),
            open: AtomicBool::new(true),
            outbound_slots: (queue_limit > 0).then(|| Arc::new(Semaphore::new(queue_limit))),
            publish_queue_timeout,
        }
    }

    /// 关闭通道；之后所有发布均被拒绝
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn reopen(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    /// 出站限流信号量（测试可借此占满队列）
    pub fn outbound_slots(&self) -> Option<Arc<Semaphore>> {
        self.outbound_slots.clone()
    }

    fn sender(&self, exchange: &str) -> broadcast::Sender<DeliveredFrame> {
        self.exchanges
            .entry(exchange.to_string())
            .or_insert_with(|| broadcast::channel(DEFAULT_CHANNEL_CAPACITY).0)
            .clone()
    }

    fn matches(entry_kind: ExchangeKind, binding_keys: &[String], routing_key: &str) -> bool {
        match entry_kind {
            ExchangeKind::Fanout => true,
            ExchangeKind::Topic => binding_keys.iter().any(|k| k == routing_key),
        }
    }
}

#[async_trait]
impl TicketPublisher for InMemoryBroker {
    async fn publish(
        &self,
        body: &[u8],
        entry: &ChannelTopologyEntry,
        correlation_id: &str,
        reply_routing_key: Option<&str>,
    ) -> PublishOutcome {
        if !self.is_open() {
            return PublishOutcome::Rejected(PublishFailure::ChannelClosed);
        }

        let _slot = match &self.outbound_slots {
            Some(slots) => {
                match tokio::time::timeout(self.publish_queue_timeout, slots.clone().acquire_owned())
                    .await
                {
                    Ok(Ok(permit)) => Some(permit),
                    Ok(Err(_)) | Err(_) => {
                        return PublishOutcome::Rejected(PublishFailure::QueueFull);
                    }
                }
            }
            None => None,
        };

        let mut headers = entry.header_properties.clone().unwrap_or_default();
        if let Some(key) = reply_routing_key {
            headers.insert("replyRoutingKey".to_string(), key.to_string());
        }

        let frame = DeliveredFrame {
            body: body.to_vec(),
            routing_key: entry.publish_routing_key().unwrap_or_default().to_string(),
            correlation_id: Some(correlation_id.to_string()),
            headers,
        };

        // 无订阅者时 send 返回错误，视为非致命（消息被代理丢弃）
        let _ = self.sender(&entry.exchange_name).send(frame);
        debug!(
            exchange = %entry.exchange_name,
            correlation_id,
            "frame published"
        );
        PublishOutcome::Accepted
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResponseConsumer for InMemoryBroker {
    async fn subscribe(
        &self,
        entry: &ChannelTopologyEntry,
    ) -> SdkResult<BoxStream<'static, DeliveredFrame>> {
        let rx = self.sender(&entry.exchange_name).subscribe();
        let kind = entry.exchange_kind;
        let bindings = entry.routing_keys.clone();
        let stream = BroadcastStream::new(rx).filter_map(move |item| {
            let bindings = bindings.clone();
            async move {
                // 滞后丢帧按代理侧丢弃处理
                let frame = item.ok()?;
                Self::matches(kind, &bindings, &frame.routing_key).then_some(frame)
            }
        });
        Ok(Box::pin(stream))
    }
}

/// 便捷函数：测试/演示中向某条消费路径注入一帧
pub fn inject_frame(
    broker: &InMemoryBroker,
    entry: &ChannelTopologyEntry,
    body: Vec<u8>,
    correlation_id: Option<String>,
    headers: HashMap<String, String>,
) {
    let frame = DeliveredFrame {
        body,
        routing_key: entry
            .publish_routing_key()
            .unwrap_or_default()
            .to_string(),
        correlation_id,
        headers,
    };
    let _ = broker.sender(&entry.exchange_name).send(frame);
}
