use std::sync::Arc;

use anyhow::Result;
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::client::{CompletionClient, Nothing};
use rig::providers::{anthropic, deepseek, gemini, groq, mistral, ollama, openai, openrouter};
use roundtable_config::{Config, ProviderConfig};
use roundtable_core::RigBackend;

pub const VALID_PROVIDERS: &str =
    "anthropic, openai, ollama, openrouter, deepseek, groq, gemini, mistral";

/// Resolve an API key from config, falling back to an environment variable.
fn resolve_api_key(provider_cfg: &Option<ProviderConfig>, env_var: &str) -> Option<String> {
    provider_cfg
        .as_ref()
        .and_then(|c| c.api_key.clone())
        .filter(|k| !k.is_empty())
        .or_else(|| std::env::var(env_var).ok().filter(|k| !k.is_empty()))
}

fn require_api_key(
    provider_cfg: &Option<ProviderConfig>,
    provider: &str,
    env_var: &str,
) -> Result<String> {
    resolve_api_key(provider_cfg, env_var).ok_or_else(|| {
        anyhow::anyhow!(
            "{provider} provider selected but no API key found. \
             Set providers.{provider}.apiKey in config.json or {env_var} env var."
        )
    })
}

fn api_base(provider_cfg: &Option<ProviderConfig>) -> Option<String> {
    provider_cfg
        .as_ref()
        .and_then(|c| c.api_base.clone())
        .filter(|b| !b.is_empty())
}

/// Whether credentials for the configured provider can be found.
pub fn has_credentials(config: &Config) -> bool {
    let p = &config.providers;
    match config.model.provider.as_str() {
        "ollama" => true,
        "anthropic" => resolve_api_key(&p.anthropic, "ANTHROPIC_API_KEY").is_some(),
        "openai" => resolve_api_key(&p.openai, "OPENAI_API_KEY").is_some(),
        "openrouter" => resolve_api_key(&p.openrouter, "OPENROUTER_API_KEY").is_some(),
        "deepseek" => resolve_api_key(&p.deepseek, "DEEPSEEK_API_KEY").is_some(),
        "groq" => resolve_api_key(&p.groq, "GROQ_API_KEY").is_some(),
        "gemini" => resolve_api_key(&p.gemini, "GEMINI_API_KEY").is_some(),
        "mistral" => resolve_api_key(&p.mistral, "MISTRAL_API_KEY").is_some(),
        _ => false,
    }
}

/// Build the text generation backend selected by `config.model`.
///
/// Errors clearly if the provider is unknown or has no API key.
#[allow(deprecated)]
pub fn create_backend(config: &Config) -> Result<RigBackend> {
    let provider = config.model.provider.as_str();
    let model_name = config.model.model.as_str();

    if provider.is_empty() {
        anyhow::bail!("No provider configured (model.provider). Valid providers: {VALID_PROVIDERS}");
    }
    if model_name.is_empty() {
        anyhow::bail!("No model configured for provider '{provider}' (model.model).");
    }

    let providers = &config.providers;
    let handle: CompletionModelHandle<'static> = match provider {
        "anthropic" => {
            let key = require_api_key(&providers.anthropic, provider, "ANTHROPIC_API_KEY")?;
            let client: anthropic::Client = anthropic::Client::builder()
                .api_key(&key)
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create Anthropic client: {e}"))?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }

        "openai" => {
            let key = require_api_key(&providers.openai, provider, "OPENAI_API_KEY")?;
            let mut builder = openai::CompletionsClient::builder().api_key(&key);
            if let Some(ref base) = api_base(&providers.openai) {
                builder = builder.base_url(base);
                tracing::info!("Using OpenAI-compatible endpoint {base}");
            }
            let client: openai::CompletionsClient = builder
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create OpenAI client: {e}"))?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }

        "ollama" => {
            let mut builder = ollama::Client::builder().api_key(Nothing);
            if let Some(ref base) = api_base(&providers.ollama) {
                builder = builder.base_url(base);
            }
            let client: ollama::Client = builder
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create Ollama client: {e}"))?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }

        "openrouter" => {
            let key = require_api_key(&providers.openrouter, provider, "OPENROUTER_API_KEY")?;
            let client: openrouter::Client = openrouter::Client::new(&key)
                .map_err(|e| anyhow::anyhow!("Failed to create OpenRouter client: {e}"))?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }

        "deepseek" => {
            let key = require_api_key(&providers.deepseek, provider, "DEEPSEEK_API_KEY")?;
            let client: deepseek::Client = deepseek::Client::new(&key)
                .map_err(|e| anyhow::anyhow!("Failed to create DeepSeek client: {e}"))?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }

        "groq" => {
            let key = require_api_key(&providers.groq, provider, "GROQ_API_KEY")?;
            let client: groq::Client = groq::Client::new(&key)
                .map_err(|e| anyhow::anyhow!("Failed to create Groq client: {e}"))?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }

        "gemini" => {
            let key = require_api_key(&providers.gemini, provider, "GEMINI_API_KEY")?;
            let client: gemini::Client = gemini::Client::new(key)
                .map_err(|e| anyhow::anyhow!("Failed to create Gemini client: {e}"))?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }

        "mistral" => {
            let key = require_api_key(&providers.mistral, provider, "MISTRAL_API_KEY")?;
            let client: mistral::Client = mistral::Client::new(&key)
                .map_err(|e| anyhow::anyhow!("Failed to create Mistral client: {e}"))?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }

        other => {
            anyhow::bail!("Unknown provider '{other}'. Valid providers: {VALID_PROVIDERS}");
        }
    };

    tracing::info!("Using {provider} provider with model '{model_name}'");
    Ok(RigBackend::new(handle, provider, model_name))
}
