// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task producer.
//!
//! Turns a freshly created world into queued work: one users task, then one
//! posts task. The task rows are durable before anything is published.

use std::sync::Arc;
use std::time::Duration;

use generia_core::{StoreError, TaskParameters, TaskStore, TaskType, WorldRecord};
use tracing::info;

use crate::notification::{
    DEFAULT_TASKS_TOPIC, NotificationPublisher, TaskCreatedEvent, publish_best_effort,
};

/// Ids of the tasks queued for a new world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueuedTasks {
    pub users_task_id: String,
    pub posts_task_id: String,
}

pub struct TaskProducer {
    store: Arc<dyn TaskStore>,
    publisher: Arc<dyn NotificationPublisher>,
    topic: String,
    publish_timeout: Duration,
}

impl TaskProducer {
    pub fn new(store: Arc<dyn TaskStore>, publisher: Arc<dyn NotificationPublisher>) -> Self {
        Self {
            store,
            publisher,
            topic: DEFAULT_TASKS_TOPIC.to_string(),
            publish_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Queue the generation tasks for `world` and announce them.
    ///
    /// Returns an error only when a task row could not be written. A users
    /// task written before a failed posts insert stays queued.
    pub async fn on_world_created(
        &self,
        world: &WorldRecord,
        user_count: i64,
        post_count: i64,
    ) -> Result<EnqueuedTasks, StoreError> {
        let users_task_id = self
            .store
            .enqueue(
                &world.id,
                TaskType::Users,
                &TaskParameters::new(user_count, &world.prompt),
            )
            .await?;
        let posts_task_id = self
            .store
            .enqueue(
                &world.id,
                TaskType::Posts,
                &TaskParameters::new(post_count, &world.prompt),
            )
            .await?;

        info!(
            world_id = %world.id,
            users_task_id = %users_task_id,
            posts_task_id = %posts_task_id,
            user_count,
            post_count,
            "Generation tasks queued"
        );

        for (task_id, task_type) in [
            (&users_task_id, TaskType::Users),
            (&posts_task_id, TaskType::Posts),
        ] {
            let event = TaskCreatedEvent::new(task_id.as_str(), task_type.as_str(), world.id.as_str());
            publish_best_effort(
                self.publisher.as_ref(),
                &self.topic,
                &event,
                self.publish_timeout,
            )
            .await;
        }

        Ok(EnqueuedTasks {
            users_task_id,
            posts_task_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::BroadcastPublisher;
    use generia_core::{NewWorld, SqliteTaskStore};

    #[tokio::test]
    async fn test_enqueues_users_then_posts_and_publishes() {
        let store = Arc::new(SqliteTaskStore::in_memory().await.unwrap());
        let world = store
            .create_world(&NewWorld {
                name: "Neo Tokyo".to_string(),
                description: String::new(),
                prompt: "a neon megacity".to_string(),
                creator_id: "creator-1".to_string(),
            })
            .await
            .unwrap();
        let bus = BroadcastPublisher::new(8);
        let mut events = bus.subscribe();
        let producer = TaskProducer::new(store.clone(), Arc::new(bus)).with_topic("world-tasks");

        let tasks = producer.on_world_created(&world, 3, 5).await.unwrap();

        let queued = store.list_tasks(&world.id).await.unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].id, tasks.users_task_id);
        assert_eq!(queued[0].task_type, "users");
        assert_eq!(queued[0].status, "pending");
        assert_eq!(
            queued[0].parameters().unwrap(),
            TaskParameters::new(3, "a neon megacity")
        );
        assert_eq!(queued[1].id, tasks.posts_task_id);
        assert_eq!(queued[1].parameters().unwrap().count, 5);

        for expected in [&tasks.users_task_id, &tasks.posts_task_id] {
            let message = events.recv().await.unwrap();
            assert_eq!(message.topic, "world-tasks");
            let event = message.task_created().unwrap();
            assert_eq!(&event.task_id, expected);
            assert_eq!(event.world_id, world.id);
        }
    }
}
