mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{bearer_get, bearer_json_request, create_project, json_request, read_json, test_app};
use courier_engine::store::Store;
use tower::ServiceExt;

#[tokio::test]
async fn health_reports_ok() {
    let harness = test_app();
    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/system/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("health");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["api_version"], "v1");
}

#[tokio::test]
async fn messages_require_a_valid_bearer_key() {
    let harness = test_app();

    let missing = harness
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/messages",
            serde_json::json!({"to": "a@x", "from": "b@y", "body": "hi"}),
        ))
        .await
        .expect("missing auth");
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    let payload = read_json(missing).await;
    assert_eq!(payload["error"], "unauthorized");

    let bogus = harness
        .app
        .clone()
        .oneshot(bearer_json_request(
            "POST",
            "/v1/messages",
            "ck_not_a_real_key",
            serde_json::json!({"to": "a@x", "from": "b@y", "body": "hi"}),
        ))
        .await
        .expect("bogus auth");
    assert_eq!(bogus.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn happy_path_accepts_and_queues() {
    let harness = test_app();
    let (project_id, key) = create_project(&harness.app, "acme", Some(1000), Some(60)).await;

    let response = harness
        .app
        .clone()
        .oneshot(bearer_json_request(
            "POST",
            "/v1/messages",
            &key,
            serde_json::json!({"to": "a@x", "from": "b@y", "body": "hi"}),
        ))
        .await
        .expect("post");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let payload = read_json(response).await;
    assert_eq!(payload["status"], "queued");
    assert!(payload.get("duplicate").is_none());
    let message_id = payload["message_id"].as_str().expect("id").to_string();

    // The accepted message is visible to its own project with a single
    // requested event.
    let detail = harness
        .app
        .clone()
        .oneshot(bearer_get(&format!("/v1/messages/{message_id}"), &key))
        .await
        .expect("detail");
    assert_eq!(detail.status(), StatusCode::OK);
    let payload = read_json(detail).await;
    assert_eq!(payload["message"]["status"], "queued");
    assert_eq!(payload["message"]["attempts"], 0);
    let events = payload["events"].as_array().expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event_type"], "requested");

    let listed = harness
        .app
        .clone()
        .oneshot(bearer_get("/v1/messages?limit=10", &key))
        .await
        .expect("list");
    assert_eq!(listed.status(), StatusCode::OK);
    let payload = read_json(listed).await;
    assert_eq!(payload["items"].as_array().expect("items").len(), 1);

    let messages = harness
        .store
        .list_messages(project_id, 10)
        .await
        .expect("store list");
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn idempotency_key_returns_the_same_message() {
    let harness = test_app();
    let (project_id, key) = create_project(&harness.app, "acme", None, None).await;
    let body = serde_json::json!({
        "to": "a@x", "from": "b@y", "body": "hi", "idempotency_key": "k1"
    });

    let first = harness
        .app
        .clone()
        .oneshot(bearer_json_request("POST", "/v1/messages", &key, body.clone()))
        .await
        .expect("first");
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let first = read_json(first).await;

    let second = harness
        .app
        .clone()
        .oneshot(bearer_json_request("POST", "/v1/messages", &key, body))
        .await
        .expect("second");
    assert_eq!(second.status(), StatusCode::OK);
    let second = read_json(second).await;

    assert_eq!(first["message_id"], second["message_id"]);
    assert_eq!(second["duplicate"], true);

    let messages = harness
        .store
        .list_messages(project_id, 10)
        .await
        .expect("store list");
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn validation_failures_are_400s() {
    let harness = test_app();
    let (_project_id, key) = create_project(&harness.app, "acme", None, None).await;

    for body in [
        serde_json::json!({"to": "", "from": "b@y", "body": "hi"}),
        serde_json::json!({"to": "not-an-address", "from": "b@y", "body": "hi"}),
        serde_json::json!({"to": "a@x", "from": "b@y", "body": ""}),
        serde_json::json!({"to": "a@x", "from": "b@y", "body": "hi", "idempotency_key": ""}),
    ] {
        let response = harness
            .app
            .clone()
            .oneshot(bearer_json_request("POST", "/v1/messages", &key, body))
            .await
            .expect("post");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let payload = read_json(response).await;
        assert_eq!(payload["error"], "validation_error");
    }
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let harness = test_app();
    let (_project_id, key) = create_project(&harness.app, "acme", None, None).await;

    let big = "x".repeat(120 * 1024);
    let response = harness
        .app
        .clone()
        .oneshot(bearer_json_request(
            "POST",
            "/v1/messages",
            &key,
            serde_json::json!({"to": "a@x", "from": "b@y", "body": big}),
        ))
        .await
        .expect("post");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn usage_endpoint_reports_the_current_period() {
    let harness = test_app();
    let (_project_id, key) = create_project(&harness.app, "acme", Some(500), None).await;

    let response = harness
        .app
        .clone()
        .oneshot(bearer_get("/v1/usage", &key))
        .await
        .expect("usage");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(payload["total"], 0);
    assert_eq!(payload["monthly_limit"], 500);
    assert_eq!(
        payload["period"],
        courier_engine::usage::current_period().as_str()
    );
}
