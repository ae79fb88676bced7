//! Kafka 事件消费
//!
//! 将消息解码为 `DomainEvent` 后交给自动化引擎，与 `POST /api/v1/events` 同一路径。
//! 无法解码或处理失败的消息转投死信 topic，原始负载按字符串保留。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use member_shared::config::KafkaConfig;
use member_shared::events::DomainEvent;
use member_shared::kafka::{ConsumerMessage, KafkaConsumer, KafkaProducer};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::automation::AutomationEngine;
use crate::error::{EngineError, Result};

/// 死信信封
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub source: String,
    pub key: Option<String>,
    pub payload: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn from_message(msg: &ConsumerMessage, error: impl Into<String>) -> Self {
        Self {
            source: msg.position(),
            key: msg.key.clone(),
            payload: String::from_utf8_lossy(&msg.payload).into_owned(),
            error: error.into(),
            failed_at: Utc::now(),
        }
    }
}

pub struct EventConsumer {
    consumer: KafkaConsumer,
    producer: KafkaProducer,
    engine: Arc<AutomationEngine>,
    events_topic: String,
    dead_letter_topic: String,
}

impl EventConsumer {
    pub fn new(config: &KafkaConfig, engine: Arc<AutomationEngine>) -> Result<Self> {
        Ok(Self {
            consumer: KafkaConsumer::new(config)?,
            producer: KafkaProducer::new(config)?,
            engine,
            events_topic: config.events_topic.clone(),
            dead_letter_topic: config.dead_letter_topic.clone(),
        })
    }

    /// 启动消费循环，直到收到关闭信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.consumer.subscribe(&[self.events_topic.as_str()])?;
        info!(topic = %self.events_topic, "领域事件消费者已启动");

        let engine = self.engine;
        let producer = self.producer;
        let dead_letter_topic = self.dead_letter_topic;

        self.consumer
            .start(shutdown, |msg| {
                let engine = &engine;
                let producer = &producer;
                let dead_letter_topic = dead_letter_topic.as_str();
                async move {
                    if let Err(e) = handle_message(engine, &msg).await {
                        error!(error = %e, position = %msg.position(), "领域事件处理失败，转投死信");
                        send_to_dead_letter(producer, dead_letter_topic, &msg, &e).await;
                    }
                    Ok::<(), EngineError>(())
                }
            })
            .await;

        info!("领域事件消费者已停止");
        Ok(())
    }
}

/// 处理单条消息：解码 -> 执行自动化
pub async fn handle_message(engine: &AutomationEngine, msg: &ConsumerMessage) -> Result<usize> {
    let event: DomainEvent = msg.deserialize_payload().map_err(|e| {
        warn!(error = %e, "事件反序列化失败");
        EngineError::from(e)
    })?;

    let records = engine.on_event(&event).await?;
    info!(
        event_id = %event.event_id,
        event_type = %event.event_type,
        executions = records.len(),
        "领域事件处理完成"
    );
    Ok(records.len())
}

async fn send_to_dead_letter(
    producer: &KafkaProducer,
    topic: &str,
    msg: &ConsumerMessage,
    err: &EngineError,
) {
    let letter = DeadLetter::from_message(msg, err.to_string());
    let key = msg.key.clone().unwrap_or_else(|| msg.position());
    if let Err(e) = producer.send_json(topic, &key, &letter).await {
        error!(error = %e, position = %msg.position(), "发送死信失败，消息可能丢失");
    }
}
