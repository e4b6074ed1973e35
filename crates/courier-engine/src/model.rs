//! Domain model shared by the store backends, the admission controllers,
//! and the dispatcher.
//!
//! The string vocabularies here mirror the database CHECK constraints; the
//! `as_str`/`parse` pairs are the single source of truth for both the SQL
//! backend and the JSON wire forms.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Tenant lifecycle. Suspension pauses delivery without losing queued work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Suspended,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Suspended => "suspended",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(ProjectStatus::Active),
            "suspended" => Some(ProjectStatus::Suspended),
            _ => None,
        }
    }
}

/// A tenant. Created through the admin plane; the engine treats it as
/// read-only configuration (suspension state, limits) per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub owner_email: String,
    pub status: ProjectStatus,
    /// Monthly delivery ceiling across channels. `None` means unlimited.
    pub monthly_limit: Option<i32>,
    /// Per-minute admission ceiling. `None` means unlimited.
    pub rate_limit_per_minute: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Delivery channel. Only email has a real adapter today; the other
/// variants are accepted by the schema and dead-end at the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Email,
    Sms,
    Whatsapp,
    Push,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Email => "email",
            ChannelType::Sms => "sms",
            ChannelType::Whatsapp => "whatsapp",
            ChannelType::Push => "push",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "email" => Some(ChannelType::Email),
            "sms" => Some(ChannelType::Sms),
            "whatsapp" => Some(ChannelType::Whatsapp),
            "push" => Some(ChannelType::Push),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message lifecycle. `Queued` is the only claimable state; the other three
/// are terminal and never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Delivered,
    Failed,
    Dead,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Failed => "failed",
            MessageStatus::Dead => "dead",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(MessageStatus::Queued),
            "delivered" => Some(MessageStatus::Delivered),
            "failed" => Some(MessageStatus::Failed),
            "dead" => Some(MessageStatus::Dead),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, MessageStatus::Queued)
    }
}

/// One durable delivery intent, possibly retried multiple times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub project_id: Uuid,
    pub channel: ChannelType,
    pub status: MessageStatus,
    pub from_address: String,
    pub to_address: String,
    pub subject: Option<String>,
    pub body: String,
    pub metadata: Option<Value>,
    /// Caller-supplied dedup token, unique per project when present.
    pub idempotency_key: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    /// When set, the dispatcher must not claim before this instant.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Reserved for future scheduled delivery; never read.
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only lifecycle observation for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Requested,
    Queued,
    Sent,
    Delivered,
    Failed,
    Bounced,
    Opened,
    Clicked,
    Dead,
    Skipped,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Requested => "requested",
            EventType::Queued => "queued",
            EventType::Sent => "sent",
            EventType::Delivered => "delivered",
            EventType::Failed => "failed",
            EventType::Bounced => "bounced",
            EventType::Opened => "opened",
            EventType::Clicked => "clicked",
            EventType::Dead => "dead",
            EventType::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "requested" => Some(EventType::Requested),
            "queued" => Some(EventType::Queued),
            "sent" => Some(EventType::Sent),
            "delivered" => Some(EventType::Delivered),
            "failed" => Some(EventType::Failed),
            "bounced" => Some(EventType::Bounced),
            "opened" => Some(EventType::Opened),
            "clicked" => Some(EventType::Clicked),
            "dead" => Some(EventType::Dead),
            "skipped" => Some(EventType::Skipped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub message_id: Uuid,
    /// Denormalized for tenant-scoped reads without a join.
    pub project_id: Uuid,
    pub event_type: EventType,
    pub provider_response: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// An API credential. The secret itself is never stored; only its SHA-256
/// hex digest lives in the database, and it is not part of this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Per-project, per-month, per-channel delivery counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageBucket {
    pub project_id: Uuid,
    /// Calendar month key, `YYYY-MM`.
    pub period: String,
    pub channel: ChannelType,
    pub count: i64,
}

/// Audit record for a control-plane write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminEvent {
    pub id: Uuid,
    pub actor: String,
    pub action: String,
    pub project_id: Option<Uuid>,
    pub detail: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codec_round_trip() {
        for status in [
            MessageStatus::Queued,
            MessageStatus::Delivered,
            MessageStatus::Failed,
            MessageStatus::Dead,
        ] {
            assert_eq!(MessageStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(MessageStatus::parse("unknown"), None);
    }

    #[test]
    fn only_queued_is_claimable() {
        assert!(!MessageStatus::Queued.is_terminal());
        assert!(MessageStatus::Delivered.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
        assert!(MessageStatus::Dead.is_terminal());
    }

    #[test]
    fn channel_codec_round_trip() {
        for channel in [
            ChannelType::Email,
            ChannelType::Sms,
            ChannelType::Whatsapp,
            ChannelType::Push,
        ] {
            assert_eq!(ChannelType::parse(channel.as_str()), Some(channel));
        }
        assert_eq!(ChannelType::parse("carrier-pigeon"), None);
    }

    #[test]
    fn event_type_codec_round_trip() {
        for event_type in [
            EventType::Requested,
            EventType::Queued,
            EventType::Sent,
            EventType::Delivered,
            EventType::Failed,
            EventType::Bounced,
            EventType::Opened,
            EventType::Clicked,
            EventType::Dead,
            EventType::Skipped,
        ] {
            assert_eq!(EventType::parse(event_type.as_str()), Some(event_type));
        }
    }

    #[test]
    fn serde_forms_are_lowercase() {
        let json = serde_json::to_string(&ChannelType::Email).expect("serialize");
        assert_eq!(json, "\"email\"");
        let json = serde_json::to_string(&MessageStatus::Dead).expect("serialize");
        assert_eq!(json, "\"dead\"");
    }
}
