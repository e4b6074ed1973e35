//! Round-trip tests against a live Postgres. Opt-in: requires the
//! `pg-tests` feature and a DATABASE_URL pointing at a throwaway database.

#![cfg(feature = "pg-tests")]

use chrono::Utc;
use courier_engine::model::{ChannelType, EventType, MessageStatus};
use courier_engine::store::postgres::{PostgresConfig, PostgresStore};
use courier_engine::store::{InsertOutcome, NewMessage, NewProject, PollBatch, Store};
use courier_engine::usage::current_period;
use serde_json::json;

async fn connect() -> PostgresStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required for pg-tests");
    PostgresStore::connect(&PostgresConfig::new(url))
        .await
        .expect("connect")
}

fn new_message(project_id: uuid::Uuid, key: Option<&str>) -> NewMessage {
    NewMessage {
        project_id,
        channel: ChannelType::Email,
        from_address: "noreply@example.com".to_string(),
        to_address: "someone@example.com".to_string(),
        subject: Some("hello".to_string()),
        body: "hi".to_string(),
        metadata: None,
        idempotency_key: key.map(str::to_string),
        max_attempts: 3,
    }
}

#[tokio::test]
async fn insert_claim_deliver_round_trip() {
    let store = connect().await;
    let project = store
        .create_project(NewProject {
            name: "pg-round-trip".to_string(),
            owner_email: "ops@example.test".to_string(),
            monthly_limit: None,
            rate_limit_per_minute: None,
        })
        .await
        .expect("project");

    let message = match store
        .insert_message(new_message(project.id, None))
        .await
        .expect("insert")
    {
        InsertOutcome::Inserted(message) => message,
        InsertOutcome::DuplicateKey => panic!("unexpected duplicate"),
    };

    let mut batch = store.begin_poll(10, Utc::now()).await.expect("poll");
    assert!(batch.messages().iter().any(|m| m.id == message.id));
    let attempts = batch.start_attempt(&message).await.expect("attempt");
    assert_eq!(attempts, 1);
    batch
        .mark_delivered(&message, json!({"accepted": true}))
        .await
        .expect("delivered");
    batch.commit().await.expect("commit");

    let stored = store
        .get_message(project.id, message.id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(stored.status, MessageStatus::Delivered);
    assert_eq!(stored.attempts, 1);

    let events = store.list_events(message.id).await.expect("events");
    assert_eq!(events.first().map(|e| e.event_type), Some(EventType::Requested));
    assert_eq!(events.last().map(|e| e.event_type), Some(EventType::Delivered));

    assert!(
        store
            .usage_total(project.id, &current_period())
            .await
            .expect("usage")
            >= 1
    );
}

#[tokio::test]
async fn idempotency_index_arbitrates_duplicates() {
    let store = connect().await;
    let project = store
        .create_project(NewProject {
            name: "pg-idempotency".to_string(),
            owner_email: "ops@example.test".to_string(),
            monthly_limit: None,
            rate_limit_per_minute: None,
        })
        .await
        .expect("project");

    let key = format!("k-{}", uuid::Uuid::new_v4());
    let first = store
        .insert_message(new_message(project.id, Some(&key)))
        .await
        .expect("first insert");
    assert!(matches!(first, InsertOutcome::Inserted(_)));

    let second = store
        .insert_message(new_message(project.id, Some(&key)))
        .await
        .expect("second insert");
    assert!(matches!(second, InsertOutcome::DuplicateKey));

    let winner = store
        .find_by_idempotency_key(project.id, &key)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(winner.1, MessageStatus::Queued);
}
