//! 通道拓扑（ChannelTopology）
//!
//! 由 `{根交换机, 账户, 节点编号, 环境标签}` 确定性地派生九个拓扑条目：
//! 提交/撤单/兑现的发布路径、三条响应路径、两条确认路径与 reoffer 撤回。
//! 命名规则是与代理侧路由约定的固定契约，必须逐字符一致，不可自行调整。
//!
use std::collections::HashMap;

use chrono::Utc;

use crate::config::SdkConfig;
use crate::error::SdkResult;
use crate::ticket::{ResponseKind, TicketKind};

/// 交换机类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Fanout,
    Topic,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
        }
    }
}

/// 单个拓扑条目（不可变值）
///
/// `queue_name` 为 None 表示由代理分配独占队列；
/// `routing_keys` 非空时首个即为默认发布键。
#[derive(Debug, Clone)]
pub struct ChannelTopologyEntry {
    pub exchange_name: String,
    pub exchange_kind: ExchangeKind,
    pub routing_keys: Vec<String>,
    pub queue_name: Option<String>,
    pub header_properties: Option<HashMap<String, String>>,
    pub reply_routing_key: Option<String>,
    pub consumer_tag: String,
}

impl ChannelTopologyEntry {
    /// 默认发布路由键 = routing_keys[0]
    pub fn publish_routing_key(&self) -> Option<&str> {
        self.routing_keys.first().map(String::as_str)
    }
}

/// 九条目拓扑，构建一次后整体只读共享
#[derive(Debug, Clone)]
pub struct ChannelTopology {
    submit: ChannelTopologyEntry,
    submit_response: ChannelTopologyEntry,
    submit_ack: ChannelTopologyEntry,
    cancel: ChannelTopologyEntry,
    cancel_response: ChannelTopologyEntry,
    cancel_ack: ChannelTopologyEntry,
    reoffer_cancel: ChannelTopologyEntry,
    cashout: ChannelTopologyEntry,
    cashout_response: ChannelTopologyEntry,
}

impl ChannelTopology {
    pub fn from_config(cfg: &SdkConfig) -> SdkResult<Self> {
        cfg.validate()?;

        let root = cfg.root_exchange_name.as_str();
        let account = cfg.account.as_str();
        let node = cfg.node_id;
        let tag = consumer_tag(&cfg.environment);

        let ticket_confirm_key = format!("node{node}.ticket.confirm");
        let cancel_confirm_key = format!("node{node}.cancel.confirm");
        let cashout_reply_key = format!("node{node}.ticket.cashout");

        let submit = ChannelTopologyEntry {
            exchange_name: format!("{root}-Submit"),
            exchange_kind: ExchangeKind::Fanout,
            routing_keys: vec![format!("{account}-Confirm-node{node}")],
            queue_name: None,
            header_properties: Some(HashMap::from([(
                "replyRoutingKey".to_string(),
                ticket_confirm_key.clone(),
            )])),
            reply_routing_key: Some(ticket_confirm_key.clone()),
            consumer_tag: tag.clone(),
        };
        let submit_response = ChannelTopologyEntry {
            exchange_name: format!("{root}-Confirm"),
            exchange_kind: ExchangeKind::Topic,
            routing_keys: vec![ticket_confirm_key],
            queue_name: Some(format!("{account}-Confirm-node{node}")),
            header_properties: None,
            reply_routing_key: None,
            consumer_tag: tag.clone(),
        };
        let submit_ack = ChannelTopologyEntry {
            exchange_name: format!("{root}-Ack"),
            exchange_kind: ExchangeKind::Topic,
            routing_keys: vec!["ack.ticket".to_string()],
            queue_name: None,
            header_properties: None,
            reply_routing_key: None,
            consumer_tag: tag.clone(),
        };
        let cancel = ChannelTopologyEntry {
            exchange_name: format!("{root}-Control"),
            exchange_kind: ExchangeKind::Topic,
            routing_keys: vec![format!("{account}-Reply-node{node}")],
            queue_name: None,
            header_properties: Some(HashMap::from([(
                "replyRoutingKey".to_string(),
                cancel_confirm_key.clone(),
            )])),
            reply_routing_key: Some(cancel_confirm_key.clone()),
            consumer_tag: tag.clone(),
        };
        let cancel_response = ChannelTopologyEntry {
            exchange_name: format!("{root}-Reply"),
            exchange_kind: ExchangeKind::Topic,
            routing_keys: vec![cancel_confirm_key],
            queue_name: Some(format!("{account}-Reply-node{node}")),
            header_properties: None,
            reply_routing_key: None,
            consumer_tag: tag.clone(),
        };
        let cancel_ack = ChannelTopologyEntry {
            exchange_name: format!("{root}-Ack"),
            exchange_kind: ExchangeKind::Topic,
            routing_keys: vec!["ack.cancel".to_string()],
            queue_name: None,
            header_properties: None,
            reply_routing_key: None,
            consumer_tag: tag.clone(),
        };
        // reoffer 撤回只有发布路径，没有响应类型；
        // 头里的 routing-key 仅作代理侧诊断用途
        let reoffer_cancel = ChannelTopologyEntry {
            exchange_name: format!("{root}-Control"),
            exchange_kind: ExchangeKind::Topic,
            routing_keys: vec!["cancel.reoffer".to_string()],
            queue_name: None,
            header_properties: Some(HashMap::from([(
                "routing-key".to_string(),
                format!("{account}-Reply-node{node}"),
            )])),
            reply_routing_key: None,
            consumer_tag: tag.clone(),
        };
        let cashout = ChannelTopologyEntry {
            exchange_name: format!("{root}-Control"),
            exchange_kind: ExchangeKind::Topic,
            routing_keys: vec!["ticket.cashout".to_string()],
            queue_name: None,
            header_properties: Some(HashMap::from([(
                "replyRoutingKey".to_string(),
                cashout_reply_key.clone(),
            )])),
            reply_routing_key: Some(cashout_reply_key.clone()),
            consumer_tag: tag.clone(),
        };
        let cashout_response = ChannelTopologyEntry {
            exchange_name: format!("{root}-Reply"),
            exchange_kind: ExchangeKind::Topic,
            routing_keys: vec![cashout_reply_key],
            queue_name: Some(format!("{account}-Reply-cashout-node{node}")),
            header_properties: None,
            reply_routing_key: None,
            consumer_tag: tag,
        };

        Ok(Self {
            submit,
            submit_response,
            submit_ack,
            cancel,
            cancel_response,
            cancel_ack,
            reoffer_cancel,
            cashout,
            cashout_response,
        })
    }

    /// 某一消息类型的发布条目
    pub fn publish_entry(&self, kind: TicketKind) -> &ChannelTopologyEntry {
        match kind {
            TicketKind::Submit => &self.submit,
            TicketKind::SubmitAck => &self.submit_ack,
            TicketKind::Cancel => &self.cancel,
            TicketKind::CancelAck => &self.cancel_ack,
            TicketKind::Cashout => &self.cashout,
            TicketKind::ReofferCancel => &self.reoffer_cancel,
        }
    }

    /// 某一响应类型的消费条目
    pub fn response_entry(&self, kind: ResponseKind) -> &ChannelTopologyEntry {
        match kind {
            ResponseKind::Submit => &self.submit_response,
            ResponseKind::Cancel => &self.cancel_response,
            ResponseKind::Cashout => &self.cashout_response,
        }
    }

    /// 全部响应条目及其类型（引擎按此逐条订阅）
    pub fn response_entries(&self) -> [(ResponseKind, &ChannelTopologyEntry); 3] {
        [
            (ResponseKind::Submit, &self.submit_response),
            (ResponseKind::Cancel, &self.cancel_response),
            (ResponseKind::Cashout, &self.cashout_response),
        ]
    }
}

/// 消费者标签：`tag_{env}|{sdk}|{version}|{yyyyMMddHHmm}|{startEpoch}|{pid}`，
/// 仅用于代理侧诊断，不参与关联逻辑
fn consumer_tag(environment: &str) -> String {
    let now = Utc::now();
    format!(
        "tag_{}|rust|{}|{}|{}|{}",
        environment,
        env!("CARGO_PKG_VERSION"),
        now.format("%Y%m%d%H%M"),
        now.timestamp(),
        std::process::id()
    )
}
