//! HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, configures middleware, and defines the shared
//! application state injected into handlers. Centralizing route composition
//! keeps `main` small and the router testable with `tower::ServiceExt`.

use crate::api;
use crate::api::openapi::ApiDoc;
use crate::audit::AuditLogger;
use crate::observability;
use axum::extract::DefaultBodyLimit;
use axum::Router;
use courier_engine::enqueue::Enqueuer;
use courier_engine::store::Store;
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use utoipa::OpenApi;

/// Request bodies are capped at 100 KiB.
pub const MAX_BODY_BYTES: usize = 100 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub enqueuer: Arc<Enqueuer>,
    pub audit: AuditLogger,
    pub admin_api_key_read: Option<String>,
    pub admin_api_key_write: Option<String>,
    pub api_version: String,
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            );
            span.set_parent(parent);
            span
        });

    Router::new()
        .route(
            "/v1/system/health",
            axum::routing::get(api::system::system_health),
        )
        .route(
            "/v1/messages",
            axum::routing::post(api::messages::create_message)
                .get(api::messages::list_messages),
        )
        .route(
            "/v1/messages/:message_id",
            axum::routing::get(api::messages::get_message),
        )
        .route("/v1/usage", axum::routing::get(api::usage::get_usage))
        .route(
            "/v1/admin/projects",
            axum::routing::get(api::admin::list_projects).post(api::admin::create_project),
        )
        .route(
            "/v1/admin/projects/:project_id",
            axum::routing::get(api::admin::get_project).patch(api::admin::patch_project),
        )
        .route(
            "/v1/admin/projects/:project_id/keys",
            axum::routing::post(api::admin::create_key),
        )
        .route(
            "/v1/admin/keys/:key_id",
            axum::routing::delete(api::admin::revoke_key),
        )
        .merge(
            utoipa_swagger_ui::SwaggerUi::new("/docs").url("/v1/openapi.json", ApiDoc::openapi()),
        )
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(trace_layer)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Last-resort recovery: a panicking handler becomes a plain
/// `internal_error` response. The panic payload is logged, never serialized.
fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> axum::http::Response<String> {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = detail, "request handler panicked");

    let body = serde_json::json!({
        "error": "internal_error",
        "message": "internal server error",
    });
    axum::http::Response::builder()
        .status(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(body.to_string())
        .unwrap_or_else(|_| axum::http::Response::new(String::new()))
}
