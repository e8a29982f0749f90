use async_trait::async_trait;
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::completion::{CompletionModel, CompletionRequest, Message};
use rig::message::{AssistantContent, Text, UserContent};
use rig::OneOrMany;
use tracing::debug;

use super::{ChatRole, ChatTurn, GenerationParams, TextBackend};
use crate::error::BackendError;

/// A rig completion model behind the `TextBackend` capability.
///
/// Every rig provider (anthropic, openai, ollama, ...) is reached through
/// the same type-erased handle, so one request shape serves them all.
#[allow(deprecated)]
pub struct RigBackend {
    model: CompletionModelHandle<'static>,
    label: String,
}

#[allow(deprecated)]
impl RigBackend {
    pub fn new(model: CompletionModelHandle<'static>, provider: &str, model_name: &str) -> Self {
        Self {
            model,
            label: format!("{provider}/{model_name}"),
        }
    }
}

impl std::fmt::Debug for RigBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RigBackend")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Split turns into the rig preamble (all system turns) and chat history.
fn to_rig_request(turns: &[ChatTurn]) -> (Option<String>, Vec<Message>) {
    let preamble = turns
        .iter()
        .filter(|t| t.role == ChatRole::System)
        .map(|t| t.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut history: Vec<Message> = turns
        .iter()
        .filter_map(|turn| match turn.role {
            ChatRole::System => None,
            ChatRole::User => Some(Message::User {
                content: OneOrMany::one(UserContent::Text(Text {
                    text: turn.content.clone(),
                })),
            }),
            ChatRole::Assistant => Some(Message::Assistant {
                id: None,
                content: OneOrMany::one(AssistantContent::Text(Text {
                    text: turn.content.clone(),
                })),
            }),
        })
        .collect();

    // Providers expect the exchange to open on a user message.
    if !matches!(history.first(), Some(Message::User { .. })) {
        history.insert(
            0,
            Message::User {
                content: OneOrMany::one(UserContent::Text(Text {
                    text: "The discussion so far follows.".into(),
                })),
            },
        );
    }

    // A trailing assistant turn reads as a prefill to some providers; close
    // the exchange with a user cue so the model answers instead of
    // continuing the previous speaker.
    if matches!(history.last(), Some(Message::Assistant { .. })) {
        history.push(Message::User {
            content: OneOrMany::one(UserContent::Text(Text {
                text: "Your turn. Reply using the PUBLIC RESPONSE and PRIVATE THOUGHTS sections."
                    .into(),
            })),
        });
    }

    let preamble = if preamble.is_empty() {
        None
    } else {
        Some(preamble)
    };
    (preamble, history)
}

#[allow(deprecated)]
#[async_trait]
impl TextBackend for RigBackend {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete(
        &self,
        turns: &[ChatTurn],
        params: &GenerationParams,
    ) -> Result<String, BackendError> {
        let (preamble, history) = to_rig_request(turns);
        debug!(
            "LLM request [{}]: {} messages, temp={}, max_tokens={}",
            self.label,
            history.len(),
            params.temperature,
            params.max_tokens
        );

        let chat_history = OneOrMany::many(history)
            .map_err(|e| BackendError::Provider(format!("empty chat history: {e}")))?;

        let request = CompletionRequest {
            preamble,
            chat_history,
            documents: Vec::new(),
            tools: Vec::new(),
            temperature: Some(params.temperature),
            max_tokens: Some(params.max_tokens),
            tool_choice: None,
            additional_params: params.provider_extras(),
        };

        let llm_start = std::time::Instant::now();
        let response = self
            .model
            .completion(request)
            .await
            .map_err(|e| BackendError::Provider(e.to_string()))?;

        let text: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect();

        debug!(
            "LLM response [{}]: {} chars in {:.1}s",
            self.label,
            text.len(),
            llm_start.elapsed().as_secs_f64()
        );

        if text.trim().is_empty() {
            return Err(BackendError::EmptyResponse);
        }
        Ok(text)
    }
}
