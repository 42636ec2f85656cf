//! 待响应表（PendingRequestTable）
//!
//! 登记每一笔尚未收到响应的提交，是调用线程与投递线程唯一共享
//! 可变的数据结构。正确性核心：
//! - 登记以 ticket_id 为键原子判重；
//! - 条目最多被移除一次（take/清扫/清空互斥），完成即单次触发；
//! - 截止时间使用单调时钟，避免挂钟回拨带来的误判。
//!
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;

use crate::error::{SdkError, SdkResult};
use crate::ticket::{TicketKind, TicketResponse};

/// 单笔提交的终态，经由 waiter 或监听器恰好交付一次
#[derive(Debug)]
pub enum TicketOutcome {
    Response(TicketResponse),
    TimedOut,
    SendFailed { reason: String },
    Closed,
}

/// 待响应条目的元数据（创建后不再修改）
#[derive(Debug, Clone)]
pub struct PendingTicket {
    pub ticket_id: String,
    pub correlation_id: String,
    pub kind: TicketKind,
    pub enqueued_at: Instant,
}

/// 表内条目：元数据 + 可选的阻塞等待槽
pub struct PendingEntry {
    meta: PendingTicket,
    deadline: Instant,
    waiter: Option<oneshot::Sender<TicketOutcome>>,
}

impl PendingEntry {
    /// 拆出元数据与等待槽；有 waiter 表示阻塞模式，
    /// 终态写入 waiter，否则由引擎转交监听器
    pub fn into_parts(self) -> (PendingTicket, Option<oneshot::Sender<TicketOutcome>>) {
        (self.meta, self.waiter)
    }
}

/// 并发安全的待响应表
#[derive(Default)]
pub struct PendingRequestTable {
    entries: DashMap<String, PendingEntry>,
}

impl PendingRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 原子登记；ticket_id 已在表中则拒绝，不触碰既有条目
    pub fn register(
        &self,
        ticket_id: &str,
        correlation_id: &str,
        kind: TicketKind,
        timeout: Duration,
        blocking: bool,
    ) -> SdkResult<Option<oneshot::Receiver<TicketOutcome>>> {
        match self.entries.entry(ticket_id.to_string()) {
            Entry::Occupied(_) => Err(SdkError::DuplicateTicket {
                ticket_id: ticket_id.to_string(),
            }),
            Entry::Vacant(slot) => {
                let now = Instant::now();
                let (waiter, receiver) = if blocking {
                    let (tx, rx) = oneshot::channel();
                    (Some(tx), Some(rx))
                } else {
                    (None, None)
                };
                slot.insert(PendingEntry {
                    meta: PendingTicket {
                        ticket_id: ticket_id.to_string(),
                        correlation_id: correlation_id.to_string(),
                        kind,
                        enqueued_at: now,
                    },
                    deadline: now + timeout,
                    waiter,
                });
                Ok(receiver)
            }
        }
    }

    /// 移除并返回条目；重复/迟到的投递在此处落空成为无操作
    pub fn take(&self, ticket_id: &str) -> Option<PendingEntry> {
        self.entries.remove(ticket_id).map(|(_, entry)| entry)
    }

    /// 移除并返回所有已过截止时间的条目
    ///
    /// 先收集键再逐个移除，移除时复核截止时间，
    /// 避免与并发的 take 竞争同一条目。
    pub fn sweep_expired(&self) -> Vec<PendingEntry> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.deadline <= now)
            .map(|e| e.key().clone())
            .collect();

        let mut out = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some((_, entry)) = self.entries.remove_if(&id, |_, e| e.deadline <= now) {
                out.push(entry);
            }
        }
        out
    }

    /// 清空整表（引擎关闭用），返回全部条目
    pub fn drain_all(&self) -> Vec<PendingEntry> {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.into_iter().filter_map(|id| self.take(&id)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, ticket_id: &str) -> bool {
        self.entries.contains_key(ticket_id)
    }
}
