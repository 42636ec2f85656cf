/// 内存代理示例
/// 展示 提交 -> 响应匹配 -> 确认 的闭环：阻塞与异步两种消费模式
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;

use mts_sdk::config::SdkConfig;
use mts_sdk::messaging::broker_inmemory::{InMemoryBroker, inject_frame};
use mts_sdk::messaging::{CorrelationEngine, ResponseConsumer, TicketListener, TicketPublisher};
use mts_sdk::ticket::{AckStatus, ResponseKind, TicketKind, TicketMessage, TicketResponse};
use mts_sdk::topology::ChannelTopology;

struct PrintListener;

#[async_trait::async_trait]
impl TicketListener for PrintListener {
    fn listener_name(&self) -> &str {
        "print"
    }

    async fn on_response(&self, response: &TicketResponse) -> anyhow::Result<()> {
        println!(
            "[listener] response for {}: status={:?}",
            response.ticket_id, response.status
        );
        Ok(())
    }

    async fn on_response_timed_out(
        &self,
        ticket_id: &str,
        _kind: TicketKind,
    ) -> anyhow::Result<()> {
        println!("[listener] {ticket_id} timed out");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = SdkConfig::builder()
        .root_exchange_name("hostexchange")
        .account("acme")
        .node_id(1)
        .response_timeout(Duration::from_secs(3))
        .sweep_interval(Duration::from_millis(200))
        .build();

    let broker = Arc::new(InMemoryBroker::from_config(&cfg));
    let topology = ChannelTopology::from_config(&cfg)?;

    // 模拟代理侧：凡提交必应答
    {
        let broker = broker.clone();
        let submit = topology.publish_entry(TicketKind::Submit).clone();
        let confirm = topology.response_entry(ResponseKind::Submit).clone();
        tokio::spawn(async move {
            let mut stream = broker.subscribe(&submit).await.expect("subscribe");
            while let Some(frame) = stream.next().await {
                let ticket: serde_json::Value =
                    serde_json::from_slice(&frame.body).expect("ticket json");
                let id = ticket["ticketId"].as_str().expect("ticketId");
                let body = serde_json::to_vec(&json!({
                    "result": {
                        "ticketId": id,
                        "status": "accepted",
                        "reason": {"code": 1024, "message": "ok"}
                    },
                    "version": "2.3"
                }))
                .expect("encode");
                inject_frame(&broker, &confirm, body, frame.correlation_id, HashMap::new());
            }
        });
    }

    let engine = Arc::new(
        CorrelationEngine::builder()
            .publisher(broker.clone() as Arc<dyn TicketPublisher>)
            .consumer(broker.clone() as Arc<dyn ResponseConsumer>)
            .topology(Arc::new(topology))
            .config(cfg)
            .listeners(vec![Arc::new(PrintListener) as Arc<dyn TicketListener>])
            .build(),
    );
    let handle = engine.clone().start().await?;

    // 阻塞模式
    let ticket = TicketMessage::builder()
        .ticket_id("demo-blocking")
        .kind(TicketKind::Submit)
        .payload(json!({"ticketId": "demo-blocking", "version": "2.3"}))
        .build();
    let response = engine.send_blocking(&ticket, None).await?;
    println!("[blocking] {} -> {:?}", response.ticket_id, response.status);
    engine
        .acknowledge(&response, AckStatus::Accepted, 9985, 0, "accepted")
        .await?;

    // 异步模式：结果由监听器打印
    let ticket = TicketMessage::builder()
        .ticket_id("demo-async")
        .kind(TicketKind::Submit)
        .payload(json!({"ticketId": "demo-async", "version": "2.3"}))
        .build();
    engine.send(&ticket).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    handle.shutdown();
    handle.join().await;
    Ok(())
}
