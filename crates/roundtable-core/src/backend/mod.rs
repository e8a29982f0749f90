pub mod adapter;
pub mod provider;
pub mod rate_limit;

pub use adapter::ModelAdapter;
pub use provider::RigBackend;
pub use rate_limit::{Clock, RateLimiter, SystemClock};

use async_trait::async_trait;

use crate::error::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    /// Leading instructions; providers receive these as the system preamble.
    System,
    User,
    Assistant,
}

/// One role-tagged entry of a backend request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Sampling parameters sent with every request, whatever the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f64,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
    pub max_tokens: u64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            max_tokens: 1000,
        }
    }
}

impl GenerationParams {
    /// Provider-specific extras for values that differ from the usual
    /// provider defaults (top_p 1, penalties 0). `None` when nothing differs,
    /// so providers that reject these fields never see them.
    pub fn provider_extras(&self) -> Option<serde_json::Value> {
        let mut extras = serde_json::Map::new();
        if self.top_p != 1.0 {
            extras.insert("top_p".into(), self.top_p.into());
        }
        if self.frequency_penalty != 0.0 {
            extras.insert("frequency_penalty".into(), self.frequency_penalty.into());
        }
        if self.presence_penalty != 0.0 {
            extras.insert("presence_penalty".into(), self.presence_penalty.into());
        }
        if extras.is_empty() {
            None
        } else {
            Some(serde_json::Value::Object(extras))
        }
    }
}

/// Capability: turn a role-tagged conversation into generated text.
///
/// Implemented once per provider family; the adapter, parser and engine
/// never know which variant is active.
#[async_trait]
pub trait TextBackend: Send + Sync {
    /// Identifier for logs, e.g. "openai/gpt-4o-mini".
    fn name(&self) -> &str;

    async fn complete(
        &self,
        turns: &[ChatTurn],
        params: &GenerationParams,
    ) -> Result<String, BackendError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = GenerationParams::default();
        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.max_tokens, 1000);
        assert!(params.provider_extras().is_none());
    }

    #[test]
    fn test_extras_only_for_non_default_values() {
        let params = GenerationParams {
            top_p: 0.9,
            presence_penalty: 0.5,
            ..Default::default()
        };
        let extras = params.provider_extras().unwrap();
        assert_eq!(extras["top_p"], 0.9);
        assert_eq!(extras["presence_penalty"], 0.5);
        assert!(extras.get("frequency_penalty").is_none());
    }
}
