//! Admin control-plane handlers.
//!
//! # Purpose
//! Project lifecycle and credential management, guarded by the static READ
//! and WRITE bearer tokens. Every write records an audit entry through the
//! bounded channel; the plaintext of a newly issued API key appears in
//! exactly one response and is never stored.

use crate::api::error::{
    api_internal, api_not_found, api_validation_error, ApiError,
};
use crate::api::types::{
    IssuedApiKey, KeyCreateRequest, ProjectCreateRequest, ProjectCreatedResponse,
    ProjectDetailResponse, ProjectListResponse, ProjectPatchRequest, ProjectView,
};
use crate::app::AppState;
use crate::auth::{generate_api_key, hash_api_key, require_admin, AdminScope};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use courier_engine::model::ProjectStatus;
use courier_engine::store::{NewAdminEvent, NewProject, ProjectPatch, StoreError};
use courier_engine::usage::current_period;
use serde_json::json;
use uuid::Uuid;

#[utoipa::path(
    get,
    path = "/v1/admin/projects",
    tag = "admin",
    responses(
        (status = 200, description = "List projects", body = ProjectListResponse),
        (status = 401, description = "Invalid admin token", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn list_projects(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ProjectListResponse>, ApiError> {
    require_admin(&state, &headers, AdminScope::Read)?;
    let items = state
        .store
        .list_projects()
        .await
        .map_err(|err| api_internal("failed to list projects", &err))?
        .into_iter()
        .map(ProjectView::from)
        .collect();
    Ok(Json(ProjectListResponse { items }))
}

#[utoipa::path(
    get,
    path = "/v1/admin/projects/{project_id}",
    tag = "admin",
    params(
        ("project_id" = Uuid, Path, description = "Project identifier")
    ),
    responses(
        (status = 200, description = "Project with current-period usage", body = ProjectDetailResponse),
        (status = 404, description = "Project not found", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn get_project(
    Path(project_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ProjectDetailResponse>, ApiError> {
    require_admin(&state, &headers, AdminScope::Read)?;
    let project = state
        .store
        .get_project(project_id)
        .await
        .map_err(|err| api_internal("failed to fetch project", &err))?
        .ok_or_else(|| api_not_found("project not found"))?;
    let period = current_period();
    let usage_total = state
        .store
        .usage_total(project_id, &period)
        .await
        .map_err(|err| api_internal("failed to read usage", &err))?;
    Ok(Json(ProjectDetailResponse {
        project: ProjectView::from(project),
        period,
        usage_total,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/admin/projects",
    tag = "admin",
    request_body = ProjectCreateRequest,
    responses(
        (status = 201, description = "Project created; the key plaintext appears only here", body = ProjectCreatedResponse),
        (status = 400, description = "Validation failure", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn create_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ProjectCreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = require_admin(&state, &headers, AdminScope::Write)?;
    if body.name.trim().is_empty() {
        return Err(api_validation_error("name is required"));
    }
    if !body.owner_email.contains('@') {
        return Err(api_validation_error("owner_email must be an email address"));
    }
    if body.monthly_limit.is_some_and(|limit| limit < 0) {
        return Err(api_validation_error("monthly_limit must be non-negative"));
    }
    if body.rate_limit_per_minute.is_some_and(|limit| limit < 1) {
        return Err(api_validation_error("rate_limit_per_minute must be at least 1"));
    }

    let project = state
        .store
        .create_project(NewProject {
            name: body.name,
            owner_email: body.owner_email,
            monthly_limit: body.monthly_limit,
            rate_limit_per_minute: body.rate_limit_per_minute,
        })
        .await
        .map_err(|err| api_internal("failed to create project", &err))?;

    let plaintext = generate_api_key();
    let key = state
        .store
        .create_api_key(project.id, "default", &hash_api_key(&plaintext))
        .await
        .map_err(|err| api_internal("failed to issue api key", &err))?;

    state.audit.record(NewAdminEvent {
        actor,
        action: "project.create".to_string(),
        project_id: Some(project.id),
        detail: Some(json!({"name": project.name})),
    });

    Ok((
        StatusCode::CREATED,
        Json(ProjectCreatedResponse {
            project: ProjectView::from(project),
            api_key: IssuedApiKey {
                id: key.id,
                name: key.name,
                key: plaintext,
            },
        }),
    ))
}

#[utoipa::path(
    patch,
    path = "/v1/admin/projects/{project_id}",
    tag = "admin",
    params(
        ("project_id" = Uuid, Path, description = "Project identifier")
    ),
    request_body = ProjectPatchRequest,
    responses(
        (status = 200, description = "Project updated", body = ProjectView),
        (status = 404, description = "Project not found", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn patch_project(
    Path(project_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ProjectPatchRequest>,
) -> Result<Json<ProjectView>, ApiError> {
    let actor = require_admin(&state, &headers, AdminScope::Write)?;

    let status = body
        .status
        .as_deref()
        .map(|value| {
            ProjectStatus::parse(value)
                .ok_or_else(|| api_validation_error("status must be active or suspended"))
        })
        .transpose()?;
    if let Some(Some(limit)) = body.monthly_limit {
        if limit < 0 {
            return Err(api_validation_error("monthly_limit must be non-negative"));
        }
    }
    if let Some(Some(limit)) = body.rate_limit_per_minute {
        if limit < 1 {
            return Err(api_validation_error("rate_limit_per_minute must be at least 1"));
        }
    }

    let updated = state
        .store
        .patch_project(
            project_id,
            ProjectPatch {
                status,
                monthly_limit: body.monthly_limit,
                rate_limit_per_minute: body.rate_limit_per_minute,
            },
        )
        .await
        .map_err(|err| match err {
            StoreError::NotFound(_) => api_not_found("project not found"),
            other => api_internal("failed to update project", &other),
        })?;

    state.audit.record(NewAdminEvent {
        actor,
        action: "project.patch".to_string(),
        project_id: Some(project_id),
        detail: Some(json!({"status": updated.status.as_str()})),
    });

    Ok(Json(ProjectView::from(updated)))
}

#[utoipa::path(
    post,
    path = "/v1/admin/projects/{project_id}/keys",
    tag = "admin",
    params(
        ("project_id" = Uuid, Path, description = "Project identifier")
    ),
    request_body = KeyCreateRequest,
    responses(
        (status = 201, description = "Key issued; plaintext appears only here", body = IssuedApiKey),
        (status = 404, description = "Project not found", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn create_key(
    Path(project_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<KeyCreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = require_admin(&state, &headers, AdminScope::Write)?;
    if body.name.trim().is_empty() {
        return Err(api_validation_error("name is required"));
    }
    let exists = state
        .store
        .get_project(project_id)
        .await
        .map_err(|err| api_internal("failed to fetch project", &err))?
        .is_some();
    if !exists {
        return Err(api_not_found("project not found"));
    }

    let plaintext = generate_api_key();
    let key = state
        .store
        .create_api_key(project_id, &body.name, &hash_api_key(&plaintext))
        .await
        .map_err(|err| api_internal("failed to issue api key", &err))?;

    state.audit.record(NewAdminEvent {
        actor,
        action: "api_key.create".to_string(),
        project_id: Some(project_id),
        detail: Some(json!({"key_id": key.id, "name": key.name})),
    });

    Ok((
        StatusCode::CREATED,
        Json(IssuedApiKey {
            id: key.id,
            name: key.name,
            key: plaintext,
        }),
    ))
}

#[utoipa::path(
    delete,
    path = "/v1/admin/keys/{key_id}",
    tag = "admin",
    params(
        ("key_id" = Uuid, Path, description = "API key identifier")
    ),
    responses(
        (status = 204, description = "Key revoked"),
        (status = 404, description = "Key not found or already revoked", body = crate::api::types::ErrorBody)
    )
)]
pub(crate) async fn revoke_key(
    Path(key_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let actor = require_admin(&state, &headers, AdminScope::Write)?;
    match state.store.revoke_api_key(key_id).await {
        Ok(()) => {
            state.audit.record(NewAdminEvent {
                actor,
                action: "api_key.revoke".to_string(),
                project_id: None,
                detail: Some(json!({"key_id": key_id})),
            });
            Ok(StatusCode::NO_CONTENT)
        }
        Err(StoreError::NotFound(_)) => Err(api_not_found("api key not found")),
        Err(err) => Err(api_internal("failed to revoke api key", &err)),
    }
}
