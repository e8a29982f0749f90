use serde::{Deserialize, Serialize};

/// Baseline prompt handed to every agent unless the config overrides it.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are one participant in a round-table discussion \
with several other AI agents. Engage with what the others have said, disagree when you have \
reason to, and keep each reply to a few sentences.";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub model: ModelRef,
    pub providers: ProvidersConfig,
    pub discussion: DiscussionConfig,
    pub storage: StorageConfig,
}

/// Provider + model combination used for every agent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    pub ollama: Option<ProviderConfig>,
    pub anthropic: Option<ProviderConfig>,
    pub openai: Option<ProviderConfig>,
    pub openrouter: Option<ProviderConfig>,
    pub deepseek: Option<ProviderConfig>,
    pub groq: Option<ProviderConfig>,
    pub gemini: Option<ProviderConfig>,
    pub mistral: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscussionConfig {
    /// Agents created for a new conversation.
    pub agents: usize,
    /// Turns run per invocation of `new` / `resume`.
    pub turns: usize,
    pub system_prompt: String,
    /// Shared budget for backend calls, per 60 second window.
    pub requests_per_minute: u32,
}

impl Default for DiscussionConfig {
    fn default() -> Self {
        Self {
            agents: 3,
            turns: 3,
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            requests_per_minute: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    pub database: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: "~/.roundtable/conversations.sqlite".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let cfg: Config = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(cfg.discussion.agents, 3);
        assert_eq!(cfg.discussion.turns, 3);
        assert_eq!(cfg.discussion.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(cfg.storage.database, "~/.roundtable/conversations.sqlite");
        assert!(cfg.model.provider.is_empty());
    }

    #[test]
    fn camel_case_fields_parsed() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "model": { "provider": "anthropic", "model": "claude-sonnet-4-5" },
            "providers": { "anthropic": { "apiKey": "sk-test" } },
            "discussion": { "agents": 5, "requestsPerMinute": 2 }
        }))
        .unwrap();
        assert_eq!(cfg.model.provider, "anthropic");
        assert_eq!(
            cfg.providers
                .anthropic
                .as_ref()
                .and_then(|p| p.api_key.as_deref()),
            Some("sk-test")
        );
        assert_eq!(cfg.discussion.agents, 5);
        assert_eq!(cfg.discussion.requests_per_minute, 2);
        // Unspecified siblings keep their defaults
        assert_eq!(cfg.discussion.turns, 3);
    }
}
