//! 票据值类型
//!
//! 定义消息类型枚举与进出引擎的两个核心值对象：
//! - `TicketMessage`：调用方构建的外发票据（标识 + JSON 载荷）；
//! - `TicketResponse`：引擎匹配后交还调用方的响应。
//! 载荷的业务字段（赔率、注额等）不在本层解释，引擎只依赖票据标识。
//!
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{SdkError, SdkResult};

/// 消息类型（封闭枚举），每种类型映射到固定的通道拓扑条目
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketKind {
    Submit,
    SubmitAck,
    Cancel,
    CancelAck,
    Cashout,
    /// 没有响应类型；仅有专属的发布条目（见 `topology`）
    ReofferCancel,
}

impl TicketKind {
    /// 该类型是否存在可关联的响应
    pub fn expects_response(&self) -> bool {
        self.response_kind().is_some()
    }

    pub fn response_kind(&self) -> Option<ResponseKind> {
        match self {
            TicketKind::Submit => Some(ResponseKind::Submit),
            TicketKind::Cancel => Some(ResponseKind::Cancel),
            TicketKind::Cashout => Some(ResponseKind::Cashout),
            TicketKind::SubmitAck | TicketKind::CancelAck | TicketKind::ReofferCancel => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketKind::Submit => "submit",
            TicketKind::SubmitAck => "submit-ack",
            TicketKind::Cancel => "cancel",
            TicketKind::CancelAck => "cancel-ack",
            TicketKind::Cashout => "cashout",
            TicketKind::ReofferCancel => "reoffer-cancel",
        }
    }
}

/// 响应类型：只有提交、撤单与兑现存在响应通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseKind {
    Submit,
    Cancel,
    Cashout,
}

impl ResponseKind {
    /// 该响应对应的确认消息类型；兑现响应按固定策略不支持确认
    pub fn ack_kind(&self) -> Option<TicketKind> {
        match self {
            ResponseKind::Submit => Some(TicketKind::SubmitAck),
            ResponseKind::Cancel => Some(TicketKind::CancelAck),
            ResponseKind::Cashout => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseKind::Submit => "submit",
            ResponseKind::Cancel => "cancel",
            ResponseKind::Cashout => "cashout",
        }
    }
}

/// 确认消息携带的接受/拒绝状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckStatus {
    Accepted,
    Rejected,
}

impl AckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckStatus::Accepted => "accepted",
            AckStatus::Rejected => "rejected",
        }
    }
}

/// 外发票据：调用方负责构建完整载荷，引擎只读取标识与类型
#[derive(Builder, Debug, Clone)]
pub struct TicketMessage {
    #[builder(into)]
    ticket_id: String,
    kind: TicketKind,
    payload: serde_json::Value,
}

impl TicketMessage {
    pub fn ticket_id(&self) -> &str {
        &self.ticket_id
    }

    pub fn kind(&self) -> TicketKind {
        self.kind
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn validate(&self) -> SdkResult<()> {
        if self.ticket_id.trim().is_empty() {
            return Err(SdkError::InvalidTicket {
                reason: "ticket_id must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// 编码为代理线上的 UTF-8 JSON 报文
    pub fn encode(&self) -> SdkResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.payload)?)
    }
}

/// 已匹配的响应：保留原始载荷与可提取的结果字段
#[derive(Debug, Clone)]
pub struct TicketResponse {
    pub ticket_id: String,
    pub kind: ResponseKind,
    /// 代理可能不传播该头，匹配不依赖它
    pub correlation_id: Option<String>,
    pub status: Option<String>,
    pub reason_code: Option<i64>,
    pub reason_message: Option<String>,
    pub signature: Option<String>,
    pub payload: serde_json::Value,
    /// 透传的诊断头（receivedUtcTimestamp 等），不参与匹配
    pub additional_info: HashMap<String, String>,
    pub received_at: DateTime<Utc>,
}

impl TicketResponse {
    /// 该响应是否允许发送确认消息
    pub fn supports_ack(&self) -> bool {
        self.kind.ack_kind().is_some()
    }
}
