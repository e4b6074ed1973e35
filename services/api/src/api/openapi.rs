//! OpenAPI document assembly.

use crate::api::types::{
    CreateMessageRequest, EnqueueResponse, ErrorBody, EventView, HealthStatus, IssuedApiKey,
    KeyCreateRequest, MessageDetailResponse, MessageListResponse, MessageView,
    ProjectCreateRequest, ProjectCreatedResponse, ProjectDetailResponse, ProjectListResponse,
    ProjectPatchRequest, ProjectView, QuotaMeta, RateLimitMeta, UsageBucketView, UsageResponse,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "courier-api",
        version = "v1",
        description = "Multi-tenant outbound message delivery API"
    ),
    paths(
        crate::api::system::system_health,
        crate::api::messages::create_message,
        crate::api::messages::list_messages,
        crate::api::messages::get_message,
        crate::api::usage::get_usage,
        crate::api::admin::list_projects,
        crate::api::admin::get_project,
        crate::api::admin::create_project,
        crate::api::admin::patch_project,
        crate::api::admin::create_key,
        crate::api::admin::revoke_key
    ),
    components(schemas(
        ErrorBody,
        QuotaMeta,
        RateLimitMeta,
        HealthStatus,
        CreateMessageRequest,
        EnqueueResponse,
        MessageView,
        EventView,
        MessageListResponse,
        MessageDetailResponse,
        UsageBucketView,
        UsageResponse,
        ProjectView,
        ProjectListResponse,
        ProjectDetailResponse,
        ProjectCreateRequest,
        ProjectCreatedResponse,
        ProjectPatchRequest,
        KeyCreateRequest,
        IssuedApiKey
    )),
    tags(
        (name = "system", description = "Health and discovery"),
        (name = "messages", description = "Message ingestion and history"),
        (name = "usage", description = "Monthly usage accounting"),
        (name = "admin", description = "Project and credential management")
    )
)]
pub struct ApiDoc;
