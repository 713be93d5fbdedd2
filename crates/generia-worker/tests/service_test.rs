// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! World service tests: request validation, task queueing and progress views.

mod common;

use std::sync::Arc;

use common::*;
use generia_core::{TaskStore, TaskType};
use generia_worker::Error;
use generia_worker::notification::{DEFAULT_TASKS_TOPIC, TASK_CREATED};
use generia_worker::producer::TaskProducer;
use generia_worker::service::{CreateWorldRequest, WorldService};

fn valid_request() -> CreateWorldRequest {
    CreateWorldRequest {
        name: "Driftwood".to_string(),
        description: "Islands made of drifting timber".to_string(),
        prompt: "A sea of floating timber islands tied together by rope bridges".to_string(),
        creator_id: "creator-7".to_string(),
        ..CreateWorldRequest::default()
    }
}

fn service_with(
    store: Arc<dyn TaskStore>,
    publisher: Arc<dyn generia_worker::notification::NotificationPublisher>,
) -> WorldService {
    let producer = Arc::new(TaskProducer::new(store.clone(), publisher));
    WorldService::new(store, producer)
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_missing_fields_are_rejected() {
    let store = test_store().await;
    let service = service_with(store.clone(), Arc::new(RecordingPublisher::default()));

    let cases = [
        (
            CreateWorldRequest {
                name: "  ".to_string(),
                ..valid_request()
            },
            "Invalid request: name is required",
        ),
        (
            CreateWorldRequest {
                prompt: String::new(),
                ..valid_request()
            },
            "Invalid request: prompt is required",
        ),
        (
            CreateWorldRequest {
                creator_id: String::new(),
                ..valid_request()
            },
            "Invalid request: creator_id is required",
        ),
    ];

    for (request, expected) in cases {
        let err = service.create_world(request).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert_eq!(err.to_string(), expected);
    }
}

#[tokio::test]
async fn test_out_of_range_counts_are_rejected() {
    let store = test_store().await;
    let service = service_with(store.clone(), Arc::new(RecordingPublisher::default()));

    for (users, posts) in [(Some(41), None), (Some(-1), None), (None, Some(251))] {
        let request = CreateWorldRequest {
            desired_user_count: users,
            desired_post_count: posts,
            ..valid_request()
        };
        let err = service.create_world(request).await.unwrap_err();
        assert!(
            matches!(err, Error::InvalidRequest(_)),
            "users={users:?} posts={posts:?} gave {err}"
        );
    }
}

#[tokio::test]
async fn test_rejected_request_writes_nothing() {
    let store = test_store().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let service = service_with(store.clone(), publisher.clone());

    let request = CreateWorldRequest {
        desired_post_count: Some(1000),
        ..valid_request()
    };
    assert!(service.create_world(request).await.is_err());
    assert!(publisher.events().is_empty());
    assert!(store.claim_next_pending().await.unwrap().is_none());
}

// ============================================================================
// Task queueing
// ============================================================================

#[tokio::test]
async fn test_default_counts_are_queued() {
    let store = test_store().await;
    let service = service_with(store.clone(), Arc::new(RecordingPublisher::default()));

    let summary = service.create_world(valid_request()).await.unwrap();
    assert_eq!(summary.desired_user_count, 25);
    assert_eq!(summary.desired_post_count, 150);

    let users = store.get_task(&summary.users_task_id).await.unwrap().unwrap();
    assert_eq!(users.task_type, "users");
    assert_eq!(users.status, "pending");
    let parameters = users.parameters().unwrap();
    assert_eq!(parameters.count, 25);
    assert_eq!(parameters.world_prompt, valid_request().prompt);

    let posts = store.get_task(&summary.posts_task_id).await.unwrap().unwrap();
    assert_eq!(posts.task_type, "posts");
    assert_eq!(posts.parameters().unwrap().count, 150);
    assert!(users.seq < posts.seq);
}

#[tokio::test]
async fn test_explicit_counts_are_queued() {
    let store = test_store().await;
    let service = service_with(store.clone(), Arc::new(RecordingPublisher::default()));

    let request = CreateWorldRequest {
        desired_user_count: Some(40),
        desired_post_count: Some(1),
        ..valid_request()
    };
    let summary = service.create_world(request).await.unwrap();

    let tasks = store.list_tasks(&summary.id).await.unwrap();
    let counts: Vec<i64> = tasks
        .iter()
        .map(|t| t.parameters().unwrap().count)
        .collect();
    assert_eq!(counts, vec![40, 1]);
}

#[tokio::test]
async fn test_task_created_events_follow_queue_order() {
    let store = test_store().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let service = service_with(store.clone(), publisher.clone());

    let summary = service.create_world(valid_request()).await.unwrap();

    let events = publisher.events();
    assert_eq!(events.len(), 2);
    for (topic, event) in &events {
        assert_eq!(topic, DEFAULT_TASKS_TOPIC);
        assert_eq!(event.event_type, TASK_CREATED);
        assert_eq!(event.world_id, summary.id);
    }
    assert_eq!(events[0].1.task_id, summary.users_task_id);
    assert_eq!(events[0].1.task_type, TaskType::Users.as_str());
    assert_eq!(events[1].1.task_id, summary.posts_task_id);
    assert_eq!(events[1].1.task_type, TaskType::Posts.as_str());
}

#[tokio::test]
async fn test_publish_failure_does_not_fail_creation() {
    let store = test_store().await;
    let service = service_with(store.clone(), Arc::new(FailingPublisher));

    let summary = service.create_world(valid_request()).await.unwrap();

    assert_eq!(store.list_tasks(&summary.id).await.unwrap().len(), 2);
    assert_eq!(summary.generation_status, "not_started");
}

// ============================================================================
// Progress view
// ============================================================================

#[tokio::test]
async fn test_get_world_before_generation() {
    let store = test_store().await;
    let service = service_with(store.clone(), Arc::new(RecordingPublisher::default()));
    let summary = service.create_world(valid_request()).await.unwrap();

    let view = service.get_world(&summary.id).await.unwrap();
    assert_eq!(view.name, "Driftwood");
    assert_eq!(view.creator_id, "creator-7");
    assert_eq!(view.status, "active");
    assert_eq!(view.generation_status, "not_started");
    assert!(!view.is_generation_finished());
    assert_eq!(view.users_count, 0);
    assert_eq!(view.posts_count, 0);

    let ids: Vec<&str> = view.tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec![summary.users_task_id.as_str(), summary.posts_task_id.as_str()]);
    assert!(view.tasks.iter().all(|t| t.result.is_none()));
}

#[tokio::test]
async fn test_get_world_after_generation_has_results() {
    let store = test_store().await;
    let service = service_with(store.clone(), Arc::new(RecordingPublisher::default()));
    let request = CreateWorldRequest {
        desired_user_count: Some(2),
        desired_post_count: Some(3),
        ..valid_request()
    };
    let summary = service.create_world(request).await.unwrap();

    let mut worker = worker(store.clone(), fast_config(4));
    worker.run_once().await;
    worker.run_once().await;

    let view = service.get_world(&summary.id).await.unwrap();
    assert_eq!(view.generation_status, "completed");
    let messages: Vec<String> = view
        .tasks
        .iter()
        .map(|t| t.result.as_ref().unwrap().message.clone())
        .collect();
    assert_eq!(messages, vec!["Generated 2 AI users", "Generated 3 AI posts"]);
}

#[tokio::test]
async fn test_get_unknown_world() {
    let store = test_store().await;
    let service = service_with(store, Arc::new(RecordingPublisher::default()));

    let err = service.get_world("no-such-world").await.unwrap_err();
    assert!(matches!(err, Error::WorldNotFound(id) if id == "no-such-world"));
}
