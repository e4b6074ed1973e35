//! HTTP API request/response types.
//!
//! # Purpose
//! Defines the payload shapes for the ingestion and admin surfaces plus the
//! OpenAPI schema derivations. Wire types are kept separate from the engine's
//! domain model; the `From` impls are the only mapping layer.

use chrono::{DateTime, Utc};
use courier_engine::model::{Event, Message, Project, UsageBucket};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitMeta>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QuotaMeta {
    pub limit: i64,
    pub current: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RateLimitMeta {
    pub limit: i64,
    pub current: i64,
    pub window: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct CreateMessageRequest {
    pub to: String,
    pub from: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Response for `POST /v1/messages`: 202 on fresh acceptance (no
/// `duplicate` field), 200 with `duplicate: true` on an idempotency hit.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EnqueueResponse {
    pub message_id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct MessageView {
    pub id: Uuid,
    pub channel: String,
    pub status: String,
    pub from_address: String,
    pub to_address: String,
    pub subject: Option<String>,
    pub body: String,
    pub idempotency_key: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Message> for MessageView {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            channel: message.channel.as_str().to_string(),
            status: message.status.as_str().to_string(),
            from_address: message.from_address,
            to_address: message.to_address,
            subject: message.subject,
            body: message.body,
            idempotency_key: message.idempotency_key,
            attempts: message.attempts,
            max_attempts: message.max_attempts,
            next_attempt_at: message.next_attempt_at,
            created_at: message.created_at,
            updated_at: message.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct EventView {
    pub id: Uuid,
    pub event_type: String,
    pub provider_response: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl From<Event> for EventView {
    fn from(event: Event) -> Self {
        Self {
            id: event.id,
            event_type: event.event_type.as_str().to_string(),
            provider_response: event.provider_response,
            created_at: event.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageListResponse {
    pub items: Vec<MessageView>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageDetailResponse {
    pub message: MessageView,
    pub events: Vec<EventView>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UsageBucketView {
    pub channel: String,
    pub count: i64,
}

impl From<UsageBucket> for UsageBucketView {
    fn from(bucket: UsageBucket) -> Self {
        Self {
            channel: bucket.channel.as_str().to_string(),
            count: bucket.count,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UsageResponse {
    pub period: String,
    pub total: i64,
    pub monthly_limit: Option<i32>,
    pub buckets: Vec<UsageBucketView>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
    pub api_version: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ProjectView {
    pub id: Uuid,
    pub name: String,
    pub owner_email: String,
    pub status: String,
    pub monthly_limit: Option<i32>,
    pub rate_limit_per_minute: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl From<Project> for ProjectView {
    fn from(project: Project) -> Self {
        Self {
            id: project.id,
            name: project.name,
            owner_email: project.owner_email,
            status: project.status.as_str().to_string(),
            monthly_limit: project.monthly_limit,
            rate_limit_per_minute: project.rate_limit_per_minute,
            created_at: project.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProjectListResponse {
    pub items: Vec<ProjectView>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProjectDetailResponse {
    pub project: ProjectView,
    pub period: String,
    pub usage_total: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ProjectCreateRequest {
    pub name: String,
    pub owner_email: String,
    #[serde(default)]
    pub monthly_limit: Option<i32>,
    #[serde(default)]
    pub rate_limit_per_minute: Option<i32>,
}

/// Admin project patch. For the limit fields, omitting a key leaves the
/// value untouched while an explicit `null` clears it to unlimited.
#[derive(Debug, Deserialize, ToSchema, Clone, Default)]
pub struct ProjectPatchRequest {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i32>)]
    pub monthly_limit: Option<Option<i32>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i32>)]
    pub rate_limit_per_minute: Option<Option<i32>>,
}

/// Distinguishes an absent key (`None`) from an explicit `null`
/// (`Some(None)`).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct KeyCreateRequest {
    pub name: String,
}

/// The only response that ever carries a plaintext key.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IssuedApiKey {
    pub id: Uuid,
    pub name: String,
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProjectCreatedResponse {
    pub project: ProjectView,
    pub api_key: IssuedApiKey,
}
