//! Channel provider adapters and the broker that selects between them.
//!
//! Adapters classify their own failures: the engine never inspects provider
//! payloads, it only acts on the verdict. Every call runs under a hard
//! deadline; an elapsed deadline, an adapter error, or a missing adapter for
//! a channel are all treated by the dispatcher as retryable transient
//! failures, so a bad adapter can never crash or wedge a worker.

use crate::model::{ChannelType, Message};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod email;
pub mod scripted;

/// Default per-call deadline.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Classified result of one provider call.
#[derive(Debug, Clone)]
pub struct ProviderVerdict {
    pub success: bool,
    /// Meaningful only when `success` is false.
    pub retryable: bool,
    /// Opaque payload recorded on the event timeline.
    pub provider_response: Value,
    pub error_message: Option<String>,
}

impl ProviderVerdict {
    pub fn delivered(provider_response: Value) -> Self {
        Self {
            success: true,
            retryable: false,
            provider_response,
            error_message: None,
        }
    }

    pub fn transient(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            retryable: true,
            provider_response: Value::Null,
            error_message: Some(error),
        }
    }

    pub fn permanent(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            retryable: false,
            provider_response: Value::Null,
            error_message: Some(error),
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attempt one delivery. `Err` is reserved for adapter-internal
    /// breakage; classified outcomes belong in the verdict.
    async fn send(&self, message: &Message) -> anyhow::Result<ProviderVerdict>;
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("no provider registered for channel {0}")]
    UnsupportedChannel(ChannelType),
    #[error("provider call exceeded {}ms deadline", .0.as_millis())]
    DeadlineExceeded(Duration),
    #[error(transparent)]
    Adapter(#[from] anyhow::Error),
}

/// Maps channel type to an adapter and enforces the per-call deadline.
pub struct ProviderBroker {
    adapters: HashMap<ChannelType, Arc<dyn Provider>>,
    call_timeout: Duration,
}

impl ProviderBroker {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_timeout(call_timeout: Duration) -> Self {
        Self {
            adapters: HashMap::new(),
            call_timeout,
        }
    }

    pub fn register(mut self, channel: ChannelType, provider: Arc<dyn Provider>) -> Self {
        self.adapters.insert(channel, provider);
        self
    }

    pub async fn send(&self, message: &Message) -> Result<ProviderVerdict, BrokerError> {
        let provider = self
            .adapters
            .get(&message.channel)
            .ok_or(BrokerError::UnsupportedChannel(message.channel))?;
        match tokio::time::timeout(self.call_timeout, provider.send(message)).await {
            Ok(Ok(verdict)) => Ok(verdict),
            Ok(Err(err)) => Err(BrokerError::Adapter(err)),
            Err(_) => Err(BrokerError::DeadlineExceeded(self.call_timeout)),
        }
    }
}

impl Default for ProviderBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MessageStatus, Message};
    use chrono::Utc;
    use uuid::Uuid;

    fn email_message() -> Message {
        let now = Utc::now();
        Message {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            channel: ChannelType::Email,
            status: MessageStatus::Queued,
            from_address: "a@x".to_string(),
            to_address: "b@y".to_string(),
            subject: None,
            body: "hi".to_string(),
            metadata: None,
            idempotency_key: None,
            attempts: 0,
            max_attempts: 3,
            next_attempt_at: None,
            scheduled_for: None,
            created_at: now,
            updated_at: now,
        }
    }

    struct SleepyProvider;

    #[async_trait]
    impl Provider for SleepyProvider {
        fn name(&self) -> &'static str {
            "sleepy"
        }

        async fn send(&self, _message: &Message) -> anyhow::Result<ProviderVerdict> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ProviderVerdict::delivered(Value::Null))
        }
    }

    #[tokio::test]
    async fn unregistered_channel_is_an_error_not_a_panic() {
        let broker = ProviderBroker::new();
        let err = broker.send(&email_message()).await.expect_err("error");
        assert!(matches!(err, BrokerError::UnsupportedChannel(ChannelType::Email)));
    }

    #[tokio::test]
    async fn deadline_cuts_off_slow_adapters() {
        let broker = ProviderBroker::with_timeout(Duration::from_millis(20))
            .register(ChannelType::Email, Arc::new(SleepyProvider));
        let err = broker.send(&email_message()).await.expect_err("timeout");
        assert!(matches!(err, BrokerError::DeadlineExceeded(_)));
    }

    #[tokio::test]
    async fn verdict_passes_through() {
        let broker = ProviderBroker::new().register(
            ChannelType::Email,
            Arc::new(scripted::ScriptedProvider::always(
                ProviderVerdict::permanent("mailbox does not exist"),
            )),
        );
        let verdict = broker.send(&email_message()).await.expect("verdict");
        assert!(!verdict.success);
        assert!(!verdict.retryable);
    }
}
