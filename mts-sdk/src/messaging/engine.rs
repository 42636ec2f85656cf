//! 关联引擎（CorrelationEngine）
//!
//! 统一编排“登记 → 发布 → 匹配/超时/失败 → 确认”的完整协议：
//! - 每笔提交先入待响应表再发布，响应不可能抢先于登记；
//! - 每个响应拓扑条目各占一个订阅循环，与调用方并发运行；
//! - 周期清扫过期条目；关闭时清空整表，不留下永久阻塞的调用方；
//! - 阻塞与异步两种消费模式共享同一状态机，终态单次触发。
//!
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bon::Builder;
use chrono::Utc;
use futures_core::stream::BoxStream;
use futures_util::{StreamExt, stream};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SdkConfig;
use crate::correlation::CorrelationIdGenerator;
use crate::error::{SdkError, SdkResult};
use crate::messaging::consumer::{self, DeliveredFrame, ResponseConsumer};
use crate::messaging::listener::TicketListener;
use crate::messaging::pending::{PendingRequestTable, TicketOutcome};
use crate::messaging::publisher::{PublishOutcome, TicketPublisher};
use crate::ticket::{AckStatus, ResponseKind, TicketKind, TicketMessage, TicketResponse};
use crate::topology::ChannelTopology;

/// 关联引擎：组合发布通道、消费通道、拓扑与待响应表
#[derive(Builder)]
pub struct CorrelationEngine {
    publisher: Arc<dyn TicketPublisher>,
    consumer: Arc<dyn ResponseConsumer>,
    topology: Arc<ChannelTopology>,
    config: SdkConfig,
    #[builder(default)]
    listeners: Vec<Arc<dyn TicketListener>>,
    #[builder(skip)]
    pending: PendingRequestTable,
    #[builder(skip)]
    correlation: CorrelationIdGenerator,
    #[builder(skip)]
    closed: AtomicBool,
}

impl CorrelationEngine {
    /// 启动引擎：先建立全部响应订阅，再派生订阅循环与清扫任务。
    /// 返回用于关闭/等待的句柄。
    pub async fn start(self: Arc<Self>) -> SdkResult<EngineHandle> {
        self.config.validate()?;

        let token = CancellationToken::new();
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(4);

        for (kind, entry) in self.topology.response_entries() {
            let stream = self.consumer.subscribe(entry).await?;
            tasks.push(tokio::spawn(Self::subscribe_loop(
                self.clone(),
                token.clone(),
                kind,
                stream,
            )));
        }

        // 清扫任务（周期任务）
        {
            let engine = self.clone();
            tasks.push(Self::spawn_periodic(
                token.clone(),
                self.config.sweep_interval,
                move || {
                    let engine = engine.clone();
                    async move { engine.sweep_once().await }
                },
            ));
        }

        info!(
            account = %self.config.account,
            node_id = self.config.node_id,
            "correlation engine started"
        );
        Ok(EngineHandle {
            engine: self,
            token,
            tasks,
        })
    }

    /// 异步提交：结果经由监听器在稍后交付
    pub async fn send(&self, ticket: &TicketMessage) -> SdkResult<()> {
        self.submit(ticket, self.config.response_timeout, false)
            .await
            .map(|_| ())
    }

    /// 阻塞提交：挂起当前任务直至终态
    ///
    /// `timeout` 为该笔提交的截止时长（缺省取配置值）；
    /// 本地等待在其上叠加余量，保证清扫是超时判定的唯一权威。
    pub async fn send_blocking(
        &self,
        ticket: &TicketMessage,
        timeout: Option<Duration>,
    ) -> SdkResult<TicketResponse> {
        let entry_timeout = timeout.unwrap_or(self.config.response_timeout);
        let receiver = self
            .submit(ticket, entry_timeout, true)
            .await?
            .ok_or_else(|| SdkError::InvalidTicket {
                reason: "blocking send requires a response-bearing ticket kind".to_string(),
            })?;

        let ticket_id = ticket.ticket_id().to_string();
        let max_wait = entry_timeout + self.config.blocking_wait_grace;
        match time::timeout(max_wait, receiver).await {
            Ok(Ok(TicketOutcome::Response(response))) => Ok(response),
            Ok(Ok(TicketOutcome::TimedOut)) => Err(SdkError::ResponseTimeout { ticket_id }),
            Ok(Ok(TicketOutcome::SendFailed { reason })) => {
                Err(SdkError::SendFailed { ticket_id, reason })
            }
            Ok(Ok(TicketOutcome::Closed)) | Ok(Err(_)) => {
                Err(SdkError::EngineClosed { ticket_id })
            }
            Err(_elapsed) => {
                // 本地守卫先于清扫触发：自行撤表，条目不得悬挂
                drop(self.pending.take(&ticket_id));
                Err(SdkError::ResponseTimeout { ticket_id })
            }
        }
    }

    /// 对已收到的响应发送确认消息（fire-and-forget）
    ///
    /// 兑现响应按固定策略不支持确认，此时为无操作而非错误。
    pub async fn acknowledge(
        &self,
        response: &TicketResponse,
        status: AckStatus,
        bookmaker_id: i64,
        code: i64,
        message: &str,
    ) -> SdkResult<()> {
        let Some(ack_kind) = response.kind.ack_kind() else {
            debug!(ticket_id = %response.ticket_id, "response kind takes no acknowledgement");
            return Ok(());
        };

        let status_field = match ack_kind {
            TicketKind::CancelAck => "cancelAckStatus",
            _ => "ackStatus",
        };
        let mut payload = serde_json::Map::new();
        payload.insert("ticketId".to_string(), json!(response.ticket_id));
        payload.insert(status_field.to_string(), json!(status.as_str()));
        payload.insert("bookmakerId".to_string(), json!(bookmaker_id));
        payload.insert("code".to_string(), json!(code));
        payload.insert("message".to_string(), json!(message));
        payload.insert(
            "timestampUtc".to_string(),
            json!(Utc::now().timestamp_millis()),
        );
        payload.insert("version".to_string(), json!("2.3"));
        let body = serde_json::to_vec(&serde_json::Value::Object(payload))?;

        let entry = self.topology.publish_entry(ack_kind);
        let correlation_id = self.correlation.next_id();
        match self
            .publisher
            .publish(&body, entry, &correlation_id, None)
            .await
        {
            PublishOutcome::Accepted => {
                debug!(ticket_id = %response.ticket_id, kind = ack_kind.as_str(), "acknowledgement published");
                Ok(())
            }
            PublishOutcome::Rejected(failure) => Err(SdkError::SendFailed {
                ticket_id: response.ticket_id.clone(),
                reason: failure.to_string(),
            }),
        }
    }

    /// 当前待响应条目数
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 将一条入站响应与待响应表匹配；重复/迟到投递为无操作
    pub async fn dispatch_response(&self, response: TicketResponse) {
        let Some(pending) = self.pending.take(&response.ticket_id) else {
            debug!(
                ticket_id = %response.ticket_id,
                "no pending entry for response (duplicate or late delivery)"
            );
            return;
        };
        let (meta, waiter) = pending.into_parts();
        debug!(
            ticket_id = %meta.ticket_id,
            correlation_id = %meta.correlation_id,
            elapsed_ms = meta.enqueued_at.elapsed().as_millis() as u64,
            "response matched"
        );
        match waiter {
            Some(tx) => {
                // 接收方可能已放弃等待；条目已移除，无需补偿
                let _ = tx.send(TicketOutcome::Response(response));
            }
            None => self.notify_response(&response).await,
        }
    }

    async fn submit(
        &self,
        ticket: &TicketMessage,
        entry_timeout: Duration,
        blocking: bool,
    ) -> SdkResult<Option<tokio::sync::oneshot::Receiver<TicketOutcome>>> {
        ticket.validate()?;
        if self.is_closed() {
            return Err(SdkError::EngineClosed {
                ticket_id: ticket.ticket_id().to_string(),
            });
        }
        if blocking && !ticket.kind().expects_response() {
            return Err(SdkError::InvalidTicket {
                reason: format!(
                    "{} tickets have no response to wait for",
                    ticket.kind().as_str()
                ),
            });
        }

        let entry = self.topology.publish_entry(ticket.kind());
        let body = ticket.encode()?;
        let correlation_id = self.correlation.next_id();

        // 登记必须先于发布，响应不可能抢在登记之前
        let receiver = if ticket.kind().expects_response() {
            let receiver = self.pending.register(
                ticket.ticket_id(),
                &correlation_id,
                ticket.kind(),
                entry_timeout,
                blocking,
            )?;
            // 关闭可能落在状态检查与登记之间；此后清扫已停、整表已清，
            // 该条目不会再被任何人移除，必须就地撤销
            if self.is_closed() {
                drop(self.pending.take(ticket.ticket_id()));
                return Err(SdkError::EngineClosed {
                    ticket_id: ticket.ticket_id().to_string(),
                });
            }
            receiver
        } else {
            None
        };

        let outcome = self
            .publisher
            .publish(&body, entry, &correlation_id, entry.reply_routing_key.as_deref())
            .await;
        match outcome {
            PublishOutcome::Accepted => {
                debug!(
                    ticket_id = %ticket.ticket_id(),
                    kind = ticket.kind().as_str(),
                    correlation_id = %correlation_id,
                    "ticket published"
                );
                Ok(receiver)
            }
            PublishOutcome::Rejected(failure) => {
                let reason = failure.to_string();
                warn!(
                    ticket_id = %ticket.ticket_id(),
                    kind = ticket.kind().as_str(),
                    %reason,
                    "publish rejected"
                );
                // 立即完成条目，绝不等待一个不会到来的响应
                if let Some(pending) = self.pending.take(ticket.ticket_id()) {
                    let (meta, waiter) = pending.into_parts();
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(TicketOutcome::SendFailed {
                                reason: reason.clone(),
                            });
                        }
                        None => self.notify_send_failed(&meta.ticket_id, &reason).await,
                    }
                } else if !ticket.kind().expects_response() {
                    // fire-and-forget 类型从未登记，直接通知
                    self.notify_send_failed(ticket.ticket_id(), &reason).await;
                }
                Ok(receiver)
            }
        }
    }

    async fn subscribe_loop(
        self: Arc<Self>,
        token: CancellationToken,
        kind: ResponseKind,
        mut stream: BoxStream<'static, DeliveredFrame>,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                maybe_frame = stream.next() => {
                    match maybe_frame {
                        Some(frame) => self.handle_frame(kind, frame).await,
                        None => {
                            warn!(kind = kind.as_str(), "response stream ended");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, kind: ResponseKind, frame: DeliveredFrame) {
        match consumer::decode_response(&frame, kind) {
            Ok(response) => self.dispatch_response(response).await,
            Err(err) => {
                warn!(%err, routing_key = %frame.routing_key, "unparsable response frame");
                let body = String::from_utf8_lossy(&frame.body).into_owned();
                self.notify_unparsable(&body, frame.correlation_id.as_deref())
                    .await;
            }
        }
    }

    async fn sweep_once(&self) {
        for pending in self.pending.sweep_expired() {
            let (meta, waiter) = pending.into_parts();
            info!(
                ticket_id = %meta.ticket_id,
                kind = meta.kind.as_str(),
                "pending ticket timed out"
            );
            match waiter {
                Some(tx) => {
                    let _ = tx.send(TicketOutcome::TimedOut);
                }
                None => self.notify_timed_out(&meta.ticket_id, meta.kind).await,
            }
        }
    }

    fn spawn_periodic<F, Fut>(
        token: CancellationToken,
        interval: Duration,
        mut f: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => f().await,
                }
            }
        })
    }

    async fn notify_response(&self, response: &TicketResponse) {
        stream::iter(self.listeners.iter().cloned())
            .for_each_concurrent(Some(self.config.listener_concurrency), |l| async move {
                if let Err(err) = l.on_response(response).await {
                    warn!(listener = l.listener_name(), %err, "ticket listener failed");
                }
            })
            .await;
    }

    async fn notify_timed_out(&self, ticket_id: &str, kind: TicketKind) {
        stream::iter(self.listeners.iter().cloned())
            .for_each_concurrent(Some(self.config.listener_concurrency), |l| async move {
                if let Err(err) = l.on_response_timed_out(ticket_id, kind).await {
                    warn!(listener = l.listener_name(), %err, "ticket listener failed");
                }
            })
            .await;
    }

    async fn notify_send_failed(&self, ticket_id: &str, reason: &str) {
        stream::iter(self.listeners.iter().cloned())
            .for_each_concurrent(Some(self.config.listener_concurrency), |l| async move {
                if let Err(err) = l.on_send_failed(ticket_id, reason).await {
                    warn!(listener = l.listener_name(), %err, "ticket listener failed");
                }
            })
            .await;
    }

    async fn notify_unparsable(&self, body: &str, correlation_id: Option<&str>) {
        stream::iter(self.listeners.iter().cloned())
            .for_each_concurrent(Some(self.config.listener_concurrency), |l| async move {
                if let Err(err) = l.on_unparsable(body, correlation_id).await {
                    warn!(listener = l.listener_name(), %err, "ticket listener failed");
                }
            })
            .await;
    }
}

/// 引擎运行句柄：用于优雅关闭与等待任务结束
pub struct EngineHandle {
    engine: Arc<CorrelationEngine>,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// 关闭引擎：停止订阅与清扫，并清空待响应表，
    /// 每个未决 waiter 都会收到 Closed 终态
    pub fn shutdown(&self) {
        if self.engine.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.token.cancel();

        let drained = self.engine.pending.drain_all();
        if !drained.is_empty() {
            info!(count = drained.len(), "draining pending tickets on shutdown");
        }
        for pending in drained {
            let (meta, waiter) = pending.into_parts();
            match waiter {
                Some(tx) => {
                    let _ = tx.send(TicketOutcome::Closed);
                }
                None => {
                    debug!(ticket_id = %meta.ticket_id, "pending ticket dropped on shutdown");
                }
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            let _ = t.await;
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::broker_inmemory::{InMemoryBroker, inject_frame};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[derive(Default)]
    struct SpyListener {
        responses: Mutex<Vec<String>>,
        timed_out: Mutex<Vec<String>>,
        send_failed: Mutex<Vec<(String, String)>>,
        unparsable: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TicketListener for SpyListener {
        fn listener_name(&self) -> &str {
            "spy"
        }
        async fn on_response(&self, response: &TicketResponse) -> anyhow::Result<()> {
            self.responses
                .lock()
                .unwrap()
                .push(response.ticket_id.clone());
            Ok(())
        }
        async fn on_response_timed_out(
            &self,
            ticket_id: &str,
            _kind: TicketKind,
        ) -> anyhow::Result<()> {
            self.timed_out.lock().unwrap().push(ticket_id.to_string());
            Ok(())
        }
        async fn on_send_failed(&self, ticket_id: &str, reason: &str) -> anyhow::Result<()> {
            self.send_failed
                .lock()
                .unwrap()
                .push((ticket_id.to_string(), reason.to_string()));
            Ok(())
        }
        async fn on_unparsable(
            &self,
            _body: &str,
            _correlation_id: Option<&str>,
        ) -> anyhow::Result<()> {
            self.unparsable.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn config() -> SdkConfig {
        SdkConfig::builder()
            .root_exchange_name("hostexchange")
            .account("acme")
            .node_id(1)
            .response_timeout(Duration::from_secs(5))
            .sweep_interval(Duration::from_millis(50))
            .blocking_wait_grace(Duration::from_millis(500))
            .build()
    }

    fn engine_with(
        broker: &Arc<InMemoryBroker>,
        cfg: SdkConfig,
        listeners: Vec<Arc<dyn TicketListener>>,
    ) -> Arc<CorrelationEngine> {
        let topology = Arc::new(ChannelTopology::from_config(&cfg).expect("topology"));
        Arc::new(
            CorrelationEngine::builder()
                .publisher(broker.clone() as Arc<dyn TicketPublisher>)
                .consumer(broker.clone() as Arc<dyn ResponseConsumer>)
                .topology(topology)
                .config(cfg)
                .listeners(listeners)
                .build(),
        )
    }

    fn submit_ticket(id: &str) -> TicketMessage {
        TicketMessage::builder()
            .ticket_id(id)
            .kind(TicketKind::Submit)
            .payload(json!({"ticketId": id, "version": "2.3"}))
            .build()
    }

    fn response_body(ticket_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "result": {
                "ticketId": ticket_id,
                "status": "accepted",
                "reason": {"code": 1024, "message": "ok"}
            },
            "version": "2.3"
        }))
        .expect("encode response")
    }

    async fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        time::timeout(deadline, async {
            loop {
                if cond() {
                    break;
                }
                time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .is_ok()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blocking_send_returns_matching_response() {
        let broker = Arc::new(InMemoryBroker::new());
        let engine = engine_with(&broker, config(), vec![]);
        let handle = engine.clone().start().await.expect("start");

        let topology =
            ChannelTopology::from_config(&config()).expect("topology");
        let confirm = topology.response_entry(ResponseKind::Submit).clone();
        let responder = {
            let broker = broker.clone();
            tokio::spawn(async move {
                time::sleep(Duration::from_millis(200)).await;
                inject_frame(
                    &broker,
                    &confirm,
                    response_body("T1"),
                    Some("corr".to_string()),
                    HashMap::new(),
                );
            })
        };

        let started = Instant::now();
        let response = engine
            .send_blocking(&submit_ticket("T1"), None)
            .await
            .expect("matched response");
        assert_eq!(response.ticket_id, "T1");
        assert_eq!(response.status.as_deref(), Some("accepted"));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(engine.pending_count(), 0);

        responder.await.expect("responder");
        handle.shutdown();
        handle.join().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blocking_send_times_out_and_entry_is_evicted() {
        let broker = Arc::new(InMemoryBroker::new());
        let engine = engine_with(&broker, config(), vec![]);
        let handle = engine.clone().start().await.expect("start");

        let started = Instant::now();
        let err = engine
            .send_blocking(&submit_ticket("T2"), Some(Duration::from_millis(300)))
            .await
            .expect_err("must time out");
        assert!(matches!(err, SdkError::ResponseTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(engine.pending_count(), 0);

        handle.shutdown();
        handle.join().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_ticket_is_rejected_synchronously() {
        let broker = Arc::new(InMemoryBroker::new());
        let engine = engine_with(&broker, config(), vec![]);
        let handle = engine.clone().start().await.expect("start");

        engine.send(&submit_ticket("T-dup")).await.expect("first send");
        assert_eq!(engine.pending_count(), 1);

        let err = engine
            .send(&submit_ticket("T-dup"))
            .await
            .expect_err("duplicate must fail");
        assert!(matches!(err, SdkError::DuplicateTicket { .. }));
        // 首条登记不受影响
        assert_eq!(engine.pending_count(), 1);

        handle.shutdown();
        handle.join().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_publish_fails_fast_without_waiting_for_timeout() {
        let broker = Arc::new(InMemoryBroker::new());
        let spy = Arc::new(SpyListener::default());
        let engine = engine_with(&broker, config(), vec![spy.clone()]);
        let handle = engine.clone().start().await.expect("start");

        broker.close();

        let started = Instant::now();
        let err = engine
            .send_blocking(&submit_ticket("T-fail"), None)
            .await
            .expect_err("publish must fail");
        assert!(matches!(err, SdkError::SendFailed { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(engine.pending_count(), 0);

        // 异步模式走监听器通知
        engine
            .send(&submit_ticket("T-fail-async"))
            .await
            .expect("async send returns void");
        assert!(
            wait_until(Duration::from_secs(2), || {
                !spy.send_failed.lock().unwrap().is_empty()
            })
            .await
        );
        let failed = spy.send_failed.lock().unwrap().clone();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "T-fail-async");

        handle.shutdown();
        handle.join().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_drains_every_blocking_caller() {
        let broker = Arc::new(InMemoryBroker::new());
        let engine = engine_with(&broker, config(), vec![]);
        let handle = engine.clone().start().await.expect("start");

        let mut callers = Vec::new();
        for i in 0..3 {
            let engine = engine.clone();
            callers.push(tokio::spawn(async move {
                engine
                    .send_blocking(&submit_ticket(&format!("T-drain-{i}")), None)
                    .await
            }));
        }
        assert!(wait_until(Duration::from_secs(2), || engine.pending_count() == 3).await);

        handle.shutdown();
        for caller in callers {
            let result = time::timeout(Duration::from_secs(2), caller)
                .await
                .expect("caller unblocked within drain bound")
                .expect("task join");
            assert!(matches!(result, Err(SdkError::EngineClosed { .. })));
        }
        assert_eq!(engine.pending_count(), 0);

        // 关闭后的新提交被同步拒绝
        let err = engine
            .send(&submit_ticket("T-late"))
            .await
            .expect_err("engine closed");
        assert!(matches!(err, SdkError::EngineClosed { .. }));

        handle.join().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn send_racing_shutdown_never_leaves_orphan_entries() {
        // 提交与关闭并发竞争：无论登记落在清空之前还是之后，
        // 每个调用方都须得到 EngineClosed，表内不得残留条目
        for _ in 0..20 {
            let broker = Arc::new(InMemoryBroker::new());
            let engine = engine_with(&broker, config(), vec![]);
            let handle = engine.clone().start().await.expect("start");

            let mut callers = Vec::new();
            for i in 0..4 {
                let engine = engine.clone();
                callers.push(tokio::spawn(async move {
                    engine
                        .send_blocking(&submit_ticket(&format!("T-race-{i}")), None)
                        .await
                }));
            }
            handle.shutdown();

            for caller in callers {
                let result = time::timeout(Duration::from_secs(2), caller)
                    .await
                    .expect("caller resolves promptly")
                    .expect("task join");
                assert!(matches!(result, Err(SdkError::EngineClosed { .. })));
            }
            assert_eq!(engine.pending_count(), 0);
            handle.join().await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn async_mode_notifies_once_and_ignores_duplicate_delivery() {
        let broker = Arc::new(InMemoryBroker::new());
        let spy = Arc::new(SpyListener::default());
        let engine = engine_with(&broker, config(), vec![spy.clone()]);
        let handle = engine.clone().start().await.expect("start");

        engine.send(&submit_ticket("T-async")).await.expect("send");

        let topology = ChannelTopology::from_config(&config()).expect("topology");
        let confirm = topology.response_entry(ResponseKind::Submit);
        // 模拟代理重复投递同一响应
        inject_frame(&broker, confirm, response_body("T-async"), None, HashMap::new());
        inject_frame(&broker, confirm, response_body("T-async"), None, HashMap::new());

        assert!(
            wait_until(Duration::from_secs(2), || {
                !spy.responses.lock().unwrap().is_empty()
            })
            .await
        );
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(spy.responses.lock().unwrap().len(), 1);
        assert_eq!(engine.pending_count(), 0);

        handle.shutdown();
        handle.join().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unparsable_frame_signals_and_subscription_survives() {
        let broker = Arc::new(InMemoryBroker::new());
        let spy = Arc::new(SpyListener::default());
        let cfg = SdkConfig::builder()
            .root_exchange_name("hostexchange")
            .account("acme")
            .node_id(1)
            .response_timeout(Duration::from_millis(400))
            .sweep_interval(Duration::from_millis(50))
            .blocking_wait_grace(Duration::from_millis(500))
            .build();
        let engine = engine_with(&broker, cfg.clone(), vec![spy.clone()]);
        let handle = engine.clone().start().await.expect("start");

        engine.send(&submit_ticket("T3")).await.expect("send");

        let topology = ChannelTopology::from_config(&cfg).expect("topology");
        let confirm = topology.response_entry(ResponseKind::Submit);
        inject_frame(
            &broker,
            confirm,
            b"not json at all".to_vec(),
            Some("corr-bad".to_string()),
            HashMap::new(),
        );

        assert!(
            wait_until(Duration::from_secs(2), || {
                spy.unparsable.load(Ordering::Relaxed) >= 1
            })
            .await
        );
        // 坏帧不完成任何条目：T3 仍按自身超时退出，且恰好一次
        assert!(
            wait_until(Duration::from_secs(2), || {
                !spy.timed_out.lock().unwrap().is_empty()
            })
            .await
        );
        time::sleep(Duration::from_millis(200)).await;
        let timed_out = spy.timed_out.lock().unwrap().clone();
        assert_eq!(timed_out, vec!["T3".to_string()]);

        // 订阅循环仍在运行：后续有效帧照常匹配
        let engine2 = engine.clone();
        let broker2 = broker.clone();
        let confirm2 = confirm.clone();
        let responder = tokio::spawn(async move {
            time::sleep(Duration::from_millis(100)).await;
            inject_frame(&broker2, &confirm2, response_body("T4"), None, HashMap::new());
        });
        let response = engine2
            .send_blocking(&submit_ticket("T4"), Some(Duration::from_secs(2)))
            .await
            .expect("loop survived the bad frame");
        assert_eq!(response.ticket_id, "T4");
        responder.await.expect("responder");

        handle.shutdown();
        handle.join().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reoffer_cancel_is_fire_and_forget() {
        let broker = Arc::new(InMemoryBroker::new());
        let engine = engine_with(&broker, config(), vec![]);
        let handle = engine.clone().start().await.expect("start");

        let reoffer = TicketMessage::builder()
            .ticket_id("T-reoffer")
            .kind(TicketKind::ReofferCancel)
            .payload(json!({"ticketId": "T-reoffer"}))
            .build();
        engine.send(&reoffer).await.expect("send");
        assert_eq!(engine.pending_count(), 0);

        let err = engine
            .send_blocking(&reoffer, None)
            .await
            .expect_err("no response to wait for");
        assert!(matches!(err, SdkError::InvalidTicket { .. }));

        handle.shutdown();
        handle.join().await;
    }
}
