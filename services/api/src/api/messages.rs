//! Message ingestion and read handlers.
//!
//! # Purpose
//! `POST /v1/messages` is the write path into the queue; the GET endpoints
//! give tenants visibility into their own messages and event timelines.
//! Admission outcomes from the engine map one-to-one onto the HTTP error
//! matrix.

use crate::api::error::{
    api_internal, api_not_found, api_quota_exceeded, api_rate_limited, api_validation_error,
    ApiError,
};
use crate::api::types::{
    CreateMessageRequest, EnqueueResponse, EventView, MessageDetailResponse, MessageListResponse,
    MessageView,
};
use crate::app::AppState;
use crate::auth::authenticate;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use courier_engine::enqueue::{AcceptRequest, EnqueueError};
use courier_engine::model::ChannelType;
use std::collections::HashMap;
use uuid::Uuid;

const MAX_LIST_LIMIT: i64 = 100;
const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

fn validate(body: &CreateMessageRequest) -> Result<(), ApiError> {
    if body.to.trim().is_empty() {
        return Err(api_validation_error("to is required"));
    }
    if !body.to.contains('@') {
        return Err(api_validation_error("to must be an email address"));
    }
    if body.from.trim().is_empty() {
        return Err(api_validation_error("from is required"));
    }
    if !body.from.contains('@') {
        return Err(api_validation_error("from must be an email address"));
    }
    if body.body.is_empty() {
        return Err(api_validation_error("body is required"));
    }
    if let Some(key) = &body.idempotency_key {
        if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(api_validation_error(
                "idempotency_key must be between 1 and 255 characters",
            ));
        }
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/v1/messages",
    tag = "messages",
    request_body = CreateMessageRequest,
    responses(
        (status = 202, description = "Message accepted and queued", body = EnqueueResponse),
        (status = 200, description = "Idempotency key matched an existing message", body = EnqueueResponse),
        (status = 400, description = "Validation failure", body = crate::api::types::ErrorBody),
        (status = 403, description = "Project suspended", body = crate::api::types::ErrorBody),
        (status = 429, description = "Quota or rate limit exceeded", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn create_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (ctx, _project) = authenticate(&state, &headers).await?;
    validate(&body)?;

    let acceptance = state
        .enqueuer
        .accept(AcceptRequest {
            project_id: ctx.project_id,
            channel: ChannelType::Email,
            from_address: body.from,
            to_address: body.to,
            subject: body.subject,
            body: body.body,
            metadata: None,
            idempotency_key: body.idempotency_key,
        })
        .await
        .map_err(map_enqueue_error)?;

    let status = if acceptance.duplicate {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((
        status,
        Json(EnqueueResponse {
            message_id: acceptance.message_id,
            status: acceptance.status.as_str().to_string(),
            duplicate: acceptance.duplicate.then_some(true),
        }),
    ))
}

fn map_enqueue_error(err: EnqueueError) -> ApiError {
    match err {
        EnqueueError::ProjectNotFound => api_not_found("project not found"),
        EnqueueError::ProjectSuspended => {
            crate::api::error::api_forbidden("project_suspended", "project is suspended")
        }
        EnqueueError::QuotaExceeded { current, limit } => api_quota_exceeded(limit, current),
        EnqueueError::RateLimited { current, limit } => api_rate_limited(limit, current),
        EnqueueError::Store(err) => api_internal("failed to enqueue message", &err),
    }
}

#[utoipa::path(
    get,
    path = "/v1/messages",
    tag = "messages",
    params(
        ("limit" = Option<i64>, Query, description = "Max messages to return (default 50, cap 100)")
    ),
    responses(
        (status = 200, description = "Recent messages, newest first", body = MessageListResponse)
    )
)]
pub(crate) async fn list_messages(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MessageListResponse>, ApiError> {
    let (ctx, _project) = authenticate(&state, &headers).await?;
    let limit = params
        .get("limit")
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let items = state
        .store
        .list_messages(ctx.project_id, limit)
        .await
        .map_err(|err| api_internal("failed to list messages", &err))?
        .into_iter()
        .map(MessageView::from)
        .collect();
    Ok(Json(MessageListResponse { items }))
}

#[utoipa::path(
    get,
    path = "/v1/messages/{message_id}",
    tag = "messages",
    params(
        ("message_id" = Uuid, Path, description = "Message identifier")
    ),
    responses(
        (status = 200, description = "Message with its event timeline", body = MessageDetailResponse),
        (status = 404, description = "Message not found", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn get_message(
    Path(message_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MessageDetailResponse>, ApiError> {
    let (ctx, _project) = authenticate(&state, &headers).await?;
    let message = state
        .store
        .get_message(ctx.project_id, message_id)
        .await
        .map_err(|err| api_internal("failed to fetch message", &err))?
        .ok_or_else(|| api_not_found("message not found"))?;
    let events = state
        .store
        .list_events(message.id)
        .await
        .map_err(|err| api_internal("failed to fetch events", &err))?
        .into_iter()
        .map(EventView::from)
        .collect();
    Ok(Json(MessageDetailResponse {
        message: MessageView::from(message),
        events,
    }))
}
