use axum::body::Body;
use axum::http::Request;
use courier_api::app::{build_router, AppState};
use courier_api::audit::spawn_audit_writer;
use courier_engine::enqueue::Enqueuer;
use courier_engine::store::memory::MemoryStore;
use courier_engine::store::Store;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

pub const ADMIN_READ_TOKEN: &str = "test-admin-read";
pub const ADMIN_WRITE_TOKEN: &str = "test-admin-write";

pub type TestService = axum::routing::RouterIntoService<Body, ()>;

pub struct TestApp {
    pub app: TestService,
    pub store: Arc<MemoryStore>,
}

pub fn test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn Store> = store.clone();
    let (audit, _writer) = spawn_audit_writer(dyn_store.clone(), 64);
    let state = AppState {
        enqueuer: Arc::new(Enqueuer::new(dyn_store.clone())),
        store: dyn_store,
        audit,
        admin_api_key_read: Some(ADMIN_READ_TOKEN.to_string()),
        admin_api_key_write: Some(ADMIN_WRITE_TOKEN.to_string()),
        api_version: "v1".to_string(),
    };
    TestApp {
        app: build_router(state).into_service(),
        store,
    }
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn bearer_json_request(
    method: &str,
    uri: &str,
    token: &str,
    body: serde_json::Value,
) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn bearer_get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .expect("request")
}

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

/// Create a project through the admin plane and return its id with the
/// plaintext key issued alongside it.
pub async fn create_project(
    app: &TestService,
    name: &str,
    monthly_limit: Option<i64>,
    rate_limit_per_minute: Option<i64>,
) -> (Uuid, String) {
    let response = app
        .clone()
        .oneshot(bearer_json_request(
            "POST",
            "/v1/admin/projects",
            ADMIN_WRITE_TOKEN,
            serde_json::json!({
                "name": name,
                "owner_email": format!("{name}@example.test"),
                "monthly_limit": monthly_limit,
                "rate_limit_per_minute": rate_limit_per_minute,
            }),
        ))
        .await
        .expect("create project");
    assert_eq!(response.status(), axum::http::StatusCode::CREATED);
    let payload = read_json(response).await;
    let project_id = payload["project"]["id"]
        .as_str()
        .expect("project id")
        .parse()
        .expect("uuid");
    let key = payload["api_key"]["key"]
        .as_str()
        .expect("plaintext key")
        .to_string();
    (project_id, key)
}
