//! 票据监听器（TicketListener）
//!
//! 异步模式下的结果通知出口。对同一 ticket_id 的同一种终态，
//! 回调至多触发一次，且必然发生在对应发布尝试已有结果之后。
//! 回调失败只记录日志，不影响其他监听器与分发循环。
//!
use async_trait::async_trait;

use crate::ticket::{TicketKind, TicketResponse};

/// 票据事件监听器；各方法默认空实现，按需覆写
#[async_trait]
pub trait TicketListener: Send + Sync {
    /// 监听器名称（用于失败日志与审计）
    fn listener_name(&self) -> &str;

    /// 收到与某笔提交匹配的响应
    async fn on_response(&self, _response: &TicketResponse) -> anyhow::Result<()> {
        Ok(())
    }

    /// 某笔提交在截止时间内未等到响应
    async fn on_response_timed_out(
        &self,
        _ticket_id: &str,
        _kind: TicketKind,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// 发布尝试失败（消息可能从未离开本进程）
    async fn on_send_failed(&self, _ticket_id: &str, _reason: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// 收到无法解码或缺少票据标识的帧；订阅循环继续运行
    async fn on_unparsable(&self, _body: &str, _correlation_id: Option<&str>) -> anyhow::Result<()> {
        Ok(())
    }
}
