//! Deterministic adapter for tests and local experiments: returns a
//! scripted sequence of verdicts, then a fixed fallback.

use super::{Provider, ProviderVerdict};
use crate::model::Message;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

pub struct ScriptedProvider {
    script: Mutex<VecDeque<ProviderVerdict>>,
    fallback: ProviderVerdict,
}

impl ScriptedProvider {
    /// Play `script` in order, then keep returning `fallback`.
    pub fn new(script: Vec<ProviderVerdict>, fallback: ProviderVerdict) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
        }
    }

    /// Same verdict on every call.
    pub fn always(verdict: ProviderVerdict) -> Self {
        Self::new(Vec::new(), verdict)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn send(&self, _message: &Message) -> anyhow::Result<ProviderVerdict> {
        let next = self
            .script
            .lock()
            .expect("script lock poisoned")
            .pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}
