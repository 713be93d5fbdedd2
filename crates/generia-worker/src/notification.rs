// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Notification bus producer.
//!
//! Task notifications are advisory. The task table is the source of truth
//! and the worker never depends on an event arriving, so every publish goes
//! through [`publish_best_effort`], which bounds it in time and swallows
//! failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default topic for task notifications.
pub const DEFAULT_TASKS_TOPIC: &str = "generia-tasks";

/// Event type carried by [`TaskCreatedEvent`].
pub const TASK_CREATED: &str = "task_created";

/// Notification errors.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// The event could not be encoded.
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    /// The bus rejected the message.
    #[error("Publish to '{topic}' failed: {message}")]
    Publish {
        /// Destination topic.
        topic: String,
        /// Backend error message.
        message: String,
    },

    /// The bus did not acknowledge within the bound.
    #[error("Publish to '{topic}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Destination topic.
        topic: String,
        /// The bound that elapsed.
        timeout_ms: u64,
    },

    /// The publisher could not be created.
    #[error("Invalid publisher configuration: {0}")]
    Config(String),
}

/// Announces that a task row was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCreatedEvent {
    pub event_type: String,
    pub task_id: String,
    pub task_type: String,
    pub world_id: String,
}

impl TaskCreatedEvent {
    pub fn new(
        task_id: impl Into<String>,
        task_type: impl Into<String>,
        world_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type: TASK_CREATED.to_string(),
            task_id: task_id.into(),
            task_type: task_type.into(),
            world_id: world_id.into(),
        }
    }
}

/// A message bus the producer can write to.
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    /// Publish `payload` to `topic`, keyed by `key`.
    async fn publish(&self, topic: &str, key: &str, payload: &[u8])
    -> Result<(), NotificationError>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

/// Publish an event, bounded by `timeout`. Failures are logged and dropped.
///
/// Returns whether the event was accepted.
pub async fn publish_best_effort(
    publisher: &dyn NotificationPublisher,
    topic: &str,
    event: &TaskCreatedEvent,
    timeout: Duration,
) -> bool {
    let result = match serde_json::to_vec(event) {
        Ok(payload) => {
            match tokio::time::timeout(timeout, publisher.publish(topic, &event.task_id, &payload))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(NotificationError::Timeout {
                    topic: topic.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            }
        }
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => {
            debug!(
                topic = %topic,
                task_id = %event.task_id,
                publisher = publisher.name(),
                "Task notification published"
            );
            true
        }
        Err(e) => {
            warn!(
                topic = %topic,
                task_id = %event.task_id,
                world_id = %event.world_id,
                publisher = publisher.name(),
                error = %e,
                "Failed to publish task notification"
            );
            false
        }
    }
}

// ============================================================================
// In-process bus
// ============================================================================

/// A message on the in-process bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// Decode the payload as a task notification.
    pub fn task_created(&self) -> Option<TaskCreatedEvent> {
        serde_json::from_slice::<TaskCreatedEvent>(&self.payload)
            .ok()
            .filter(|e| e.event_type == TASK_CREATED)
    }
}

/// In-process bus backed by `tokio::sync::broadcast`.
///
/// Used when the producer and the worker share a process; the notifying
/// scheduler subscribes to it to wake early.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<BusMessage>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl NotificationPublisher for BroadcastPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(), NotificationError> {
        let message = BusMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_vec(),
        };
        // No subscribers is not an error for an advisory bus.
        if self.sender.send(message).is_err() {
            debug!(topic = %topic, "No subscribers on in-process bus");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "broadcast"
    }
}

/// Logs and drops every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

#[async_trait]
impl NotificationPublisher for NoopPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        _payload: &[u8],
    ) -> Result<(), NotificationError> {
        debug!(topic = %topic, key = %key, "Notification bus disabled, dropping message");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Publishes to several buses. Fails if any of them fails, after trying all.
pub struct FanoutPublisher {
    publishers: Vec<Arc<dyn NotificationPublisher>>,
}

impl FanoutPublisher {
    pub fn new(publishers: Vec<Arc<dyn NotificationPublisher>>) -> Self {
        Self { publishers }
    }
}

#[async_trait]
impl NotificationPublisher for FanoutPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(), NotificationError> {
        let mut first_error = None;
        for publisher in &self.publishers {
            if let Err(e) = publisher.publish(topic, key, payload).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "fanout"
    }
}

// ============================================================================
// Kafka
// ============================================================================

#[cfg(feature = "kafka")]
pub use self::kafka::KafkaPublisher;

#[cfg(feature = "kafka")]
mod kafka {
    use std::time::Duration;

    use async_trait::async_trait;
    use rdkafka::config::ClientConfig;
    use rdkafka::producer::{FutureProducer, FutureRecord};
    use rdkafka::util::Timeout;
    use tracing::info;

    use super::{NotificationError, NotificationPublisher};

    /// Kafka producer with leader-only acknowledgement.
    pub struct KafkaPublisher {
        producer: FutureProducer,
        timeout: Duration,
    }

    impl KafkaPublisher {
        /// Connect to a comma-separated broker list.
        pub fn new(brokers: &str, timeout: Duration) -> Result<Self, NotificationError> {
            let producer: FutureProducer = ClientConfig::new()
                .set("bootstrap.servers", brokers)
                .set("acks", "1")
                .set("message.timeout.ms", timeout.as_millis().to_string())
                .create()
                .map_err(|e| NotificationError::Config(e.to_string()))?;

            info!(brokers = %brokers, "Kafka publisher created");
            Ok(Self { producer, timeout })
        }
    }

    #[async_trait]
    impl NotificationPublisher for KafkaPublisher {
        async fn publish(
            &self,
            topic: &str,
            key: &str,
            payload: &[u8],
        ) -> Result<(), NotificationError> {
            let record = FutureRecord::to(topic).key(key).payload(payload);
            self.producer
                .send(record, Timeout::After(self.timeout))
                .await
                .map(|_| ())
                .map_err(|(e, _)| NotificationError::Publish {
                    topic: topic.to_string(),
                    message: e.to_string(),
                })
        }

        fn name(&self) -> &'static str {
            "kafka"
        }
    }
}
