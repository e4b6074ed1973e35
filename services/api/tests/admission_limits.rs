mod common;

use axum::http::StatusCode;
use common::{bearer_json_request, create_project, read_json, test_app};
use courier_engine::dispatch::{Dispatcher, DispatcherConfig};
use courier_engine::model::ChannelType;
use courier_engine::provider::email::MockSmtpProvider;
use courier_engine::provider::ProviderBroker;
use courier_engine::store::Store;
use std::sync::Arc;
use tower::ServiceExt;

fn message_body() -> serde_json::Value {
    serde_json::json!({"to": "a@x", "from": "b@y", "body": "hi"})
}

#[tokio::test]
async fn quota_rejection_carries_the_counters() {
    let harness = test_app();
    let (project_id, key) = create_project(&harness.app, "acme", Some(5), None).await;

    for _ in 0..5 {
        let response = harness
            .app
            .clone()
            .oneshot(bearer_json_request("POST", "/v1/messages", &key, message_body()))
            .await
            .expect("post");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    // Drain the queue with a real dispatcher so the usage ledger reaches the
    // ceiling; quota only counts successful deliveries.
    let store: Arc<dyn Store> = harness.store.clone();
    let dispatcher = Dispatcher::new(
        store.clone(),
        ProviderBroker::new().register(ChannelType::Email, Arc::new(MockSmtpProvider::new())),
        DispatcherConfig { batch_size: 10 },
    );
    let claimed = dispatcher.poll_once().await.expect("poll");
    assert_eq!(claimed, 5);
    assert_eq!(
        store
            .usage_total(project_id, &courier_engine::usage::current_period())
            .await
            .expect("usage"),
        5
    );

    let response = harness
        .app
        .clone()
        .oneshot(bearer_json_request("POST", "/v1/messages", &key, message_body()))
        .await
        .expect("post over quota");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let payload = read_json(response).await;
    assert_eq!(payload["error"], "monthly_quota_exceeded");
    assert_eq!(payload["quota"]["limit"], 5);
    assert_eq!(payload["quota"]["current"], 5);

    // No message row was created for the rejected request.
    let messages = harness
        .store
        .list_messages(project_id, 100)
        .await
        .expect("list");
    assert_eq!(messages.len(), 5);
}

#[tokio::test]
async fn rate_limit_rejection_carries_the_counters() {
    let harness = test_app();
    let (project_id, key) = create_project(&harness.app, "acme", None, Some(3)).await;

    for _ in 0..3 {
        let response = harness
            .app
            .clone()
            .oneshot(bearer_json_request("POST", "/v1/messages", &key, message_body()))
            .await
            .expect("post");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let response = harness
        .app
        .clone()
        .oneshot(bearer_json_request("POST", "/v1/messages", &key, message_body()))
        .await
        .expect("post over rate");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let payload = read_json(response).await;
    assert_eq!(payload["error"], "rate_limit_exceeded");
    assert_eq!(payload["rate_limit"]["limit"], 3);
    assert_eq!(payload["rate_limit"]["current"], 4);
    assert_eq!(payload["rate_limit"]["window"], "per_minute");

    // The rejected request consumed a token but created no message.
    let messages = harness
        .store
        .list_messages(project_id, 100)
        .await
        .expect("list");
    assert_eq!(messages.len(), 3);
}
