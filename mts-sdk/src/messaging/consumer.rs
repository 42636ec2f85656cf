//! 响应消费通道（ResponseConsumer）协议与帧解码
//!
//! 订阅某一拓扑条目的队列，取得 'static 生命周期的帧流，
//! 便于在 tokio::spawn 的循环中消费；解码失败不中断订阅，
//! 由引擎以“不可解析消息”信号对外报告。
//!
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use futures_core::stream::BoxStream;

use crate::error::{SdkError, SdkResult};
use crate::ticket::{ResponseKind, TicketResponse};
use crate::topology::ChannelTopologyEntry;

/// 透传的诊断头，仅这三个会被提取，均不参与匹配
const DIAGNOSTIC_HEADERS: [&str; 3] = [
    "receivedUtcTimestamp",
    "validatedUtcTimestamp",
    "respondedUtcTimestamp",
];

/// 代理投递的原始帧
#[derive(Debug, Clone)]
pub struct DeliveredFrame {
    pub body: Vec<u8>,
    pub routing_key: String,
    pub correlation_id: Option<String>,
    pub headers: HashMap<String, String>,
}

/// 消费通道：订阅一个拓扑条目，返回帧流
#[async_trait]
pub trait ResponseConsumer: Send + Sync {
    async fn subscribe(
        &self,
        entry: &ChannelTopologyEntry,
    ) -> SdkResult<BoxStream<'static, DeliveredFrame>>;
}

/// 将一帧解码为类型化响应
///
/// 票据标识优先取顶层 `ticketId`，其次取 `result.ticketId`；
/// 两处皆无或报文不是 JSON 时返回 Parse 错误。
pub fn decode_response(frame: &DeliveredFrame, kind: ResponseKind) -> SdkResult<TicketResponse> {
    let payload: serde_json::Value = serde_json::from_slice(&frame.body)?;

    let ticket_id = payload
        .get("ticketId")
        .or_else(|| payload.get("result").and_then(|r| r.get("ticketId")))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SdkError::Parse {
            reason: "response carries no ticketId".to_string(),
        })?;

    let result = payload.get("result");
    let status = result
        .and_then(|r| r.get("status"))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);
    let reason = result.and_then(|r| r.get("reason"));
    let reason_code = reason
        .and_then(|r| r.get("code"))
        .and_then(serde_json::Value::as_i64);
    let reason_message = reason
        .and_then(|r| r.get("message"))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);
    let signature = payload
        .get("signature")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);

    let additional_info = DIAGNOSTIC_HEADERS
        .iter()
        .filter_map(|k| frame.headers.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect();

    Ok(TicketResponse {
        ticket_id,
        kind,
        correlation_id: frame.correlation_id.clone(),
        status,
        reason_code,
        reason_message,
        signature,
        payload,
        additional_info,
        received_at: Utc::now(),
    })
}
