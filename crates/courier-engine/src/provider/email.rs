//! Mock SMTP adapter.
//!
//! The actual email-sending mechanics are an external collaborator; this
//! adapter stands in for it by logging the send and returning an accepted
//! verdict with a synthetic provider message id.

use super::{Provider, ProviderVerdict};
use crate::model::Message;
use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MockSmtpProvider;

impl MockSmtpProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provider for MockSmtpProvider {
    fn name(&self) -> &'static str {
        "mock-smtp"
    }

    async fn send(&self, message: &Message) -> anyhow::Result<ProviderVerdict> {
        let provider_message_id = Uuid::new_v4();
        tracing::info!(
            message_id = %message.id,
            to = %message.to_address,
            %provider_message_id,
            "mock smtp accepted message"
        );
        Ok(ProviderVerdict::delivered(json!({
            "provider": "mock-smtp",
            "provider_message_id": provider_message_id,
            "accepted": true,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChannelType, MessageStatus};
    use chrono::Utc;

    #[tokio::test]
    async fn always_accepts() {
        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            channel: ChannelType::Email,
            status: MessageStatus::Queued,
            from_address: "a@x".to_string(),
            to_address: "b@y".to_string(),
            subject: Some("hello".to_string()),
            body: "hi".to_string(),
            metadata: None,
            idempotency_key: None,
            attempts: 0,
            max_attempts: 3,
            next_attempt_at: None,
            scheduled_for: None,
            created_at: now,
            updated_at: now,
        };
        let verdict = MockSmtpProvider::new().send(&message).await.expect("send");
        assert!(verdict.success);
        assert_eq!(verdict.provider_response["provider"], "mock-smtp");
    }
}
