use std::time::Duration;

use frame_snap_common::config::BusConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::Message;
use rdkafka::ClientConfig;
use tracing::{debug, info, warn};

use crate::receiver::FrameReceiver;

/// Upper bound on messages handed to the receiver per spin, so a burst on the
/// topic cannot starve keyboard polling.
const MAX_MESSAGES_PER_SPIN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to create Kafka consumer: {0}")]
    KafkaCreate(String),
    #[error("failed to subscribe to topic {0}: {1}")]
    Subscribe(String, String),
}

/// Delivers incoming image messages to a [`FrameReceiver`].
pub trait FrameSource {
    /// Wait up to `timeout` for messages and pass everything pending to
    /// `receiver`. Returns the number of messages delivered.
    fn spin_once(&mut self, timeout: Duration, receiver: &FrameReceiver) -> usize;

    /// Release the bus connection. Called once, during shutdown.
    fn close(&mut self);
}

/// Kafka-backed image topic subscription.
pub struct KafkaSource {
    consumer: Option<BaseConsumer>,
    topic: String,
}

impl KafkaSource {
    pub fn connect(config: &BusConfig) -> Result<Self, SourceError> {
        let consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", "latest")
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "1000")
            .set("max.partition.fetch.bytes", "10485760")
            .create()
            .map_err(|e| SourceError::KafkaCreate(e.to_string()))?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| SourceError::Subscribe(config.topic.clone(), e.to_string()))?;

        info!(
            brokers = config.brokers,
            topic = config.topic,
            group_id = config.group_id,
            "subscribed to image topic"
        );

        Ok(Self {
            consumer: Some(consumer),
            topic: config.topic.clone(),
        })
    }
}

impl FrameSource for KafkaSource {
    fn spin_once(&mut self, timeout: Duration, receiver: &FrameReceiver) -> usize {
        let Some(consumer) = &self.consumer else {
            return 0;
        };
        drain(timeout, |wait| consumer.poll(wait), receiver)
    }

    fn close(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            info!(topic = self.topic, "unsubscribed from image topic");
        }
    }
}

/// Hand up to [`MAX_MESSAGES_PER_SPIN`] polled messages to `receiver`.
///
/// Only the first poll waits for `timeout`; the rest take what is already
/// queued. A consume error ends the batch.
fn drain<M: Message>(
    timeout: Duration,
    mut poll: impl FnMut(Duration) -> Option<KafkaResult<M>>,
    receiver: &FrameReceiver,
) -> usize {
    let mut delivered = 0;
    let mut wait = timeout;
    while delivered < MAX_MESSAGES_PER_SPIN {
        match poll(wait) {
            None => break,
            Some(Ok(msg)) => {
                delivered += 1;
                match msg.payload() {
                    Some(payload) => {
                        receiver.on_payload(payload);
                    }
                    None => debug!(offset = msg.offset(), "empty Kafka message, skipping"),
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "Kafka consume error");
                break;
            }
        }
        wait = Duration::ZERO;
    }
    delivered
}

impl Drop for KafkaSource {
    fn drop(&mut self) {
        self.close();
    }
}
