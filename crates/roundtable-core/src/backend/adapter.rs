use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::{ChatRole, ChatTurn, GenerationParams, RateLimiter, TextBackend};
use crate::conversation::Message;
use crate::error::BackendError;
use crate::parser::{AgentResponse, ResponseParser};

/// Rate-limited entry point to one text generation backend.
///
/// `generate` never fails: backend errors come back as an
/// `AgentResponse::unavailable` substitute so the turn loop keeps going.
pub struct ModelAdapter {
    backend: Arc<dyn TextBackend>,
    limiter: RateLimiter,
    params: GenerationParams,
    parsers: Mutex<HashMap<String, ResponseParser>>,
}

impl ModelAdapter {
    pub fn new(backend: Arc<dyn TextBackend>, limiter: RateLimiter) -> Self {
        Self {
            backend,
            limiter,
            params: GenerationParams::default(),
            parsers: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Produce one agent's reply to the public history.
    ///
    /// `public_history` must hold only public messages and `private_thoughts`
    /// only this agent's own private messages.
    pub async fn generate(
        &self,
        agent_name: &str,
        system_prompt: &str,
        public_history: &[Message],
        private_thoughts: &[Message],
    ) -> AgentResponse {
        let turns = build_turns(agent_name, system_prompt, public_history, private_thoughts);
        debug!(
            "Request for agent {agent_name}: {} turns ({} public, {} private)",
            turns.len(),
            public_history.len(),
            private_thoughts.len()
        );

        self.limiter.acquire().await;
        let result = self.backend.complete(&turns, &self.params).await;
        if result.is_ok() {
            self.limiter.record_dispatch().await;
        }

        match result.and_then(|text| {
            if text.trim().is_empty() {
                Err(BackendError::EmptyResponse)
            } else {
                Ok(text)
            }
        }) {
            Ok(text) => self.parser_for(agent_name).parse(&text),
            Err(e) => {
                warn!(
                    "Backend {} failed for agent {agent_name}: {e}",
                    self.backend.name()
                );
                AgentResponse::unavailable(agent_name, &e)
            }
        }
    }

    /// The reply parser for one agent, compiled on first use.
    fn parser_for(&self, agent_name: &str) -> ResponseParser {
        match self.parsers.lock() {
            Ok(mut parsers) => parsers
                .entry(agent_name.to_string())
                .or_insert_with(|| ResponseParser::for_agent(agent_name))
                .clone(),
            Err(_) => ResponseParser::for_agent(agent_name),
        }
    }
}

/// Assemble the role-tagged request for one agent.
///
/// Order: instructions, prior private thoughts (only when there are any),
/// then one turn per public message. Authored messages become assistant
/// turns prefixed with "<name>: "; system messages become raw user turns.
pub fn build_turns(
    agent_name: &str,
    system_prompt: &str,
    public_history: &[Message],
    private_thoughts: &[Message],
) -> Vec<ChatTurn> {
    let mut turns = Vec::with_capacity(public_history.len() + 2);

    turns.push(ChatTurn::new(
        ChatRole::System,
        format!(
            "{system_prompt}\n\n\
             You are agent {agent_name}. Format every reply as two labeled sections:\n\n\
             PUBLIC RESPONSE:\n<what you say to the other agents>\n\n\
             PRIVATE THOUGHTS:\n<your private reflection, which no other agent will see>"
        ),
    ));

    if !private_thoughts.is_empty() {
        let notes = private_thoughts
            .iter()
            .map(|m| format!("- {}", m.content))
            .collect::<Vec<_>>()
            .join("\n");
        turns.push(ChatTurn::new(
            ChatRole::System,
            format!("Your previous private thoughts:\n{notes}"),
        ));
    }

    for msg in public_history {
        match msg.agent_name.as_deref() {
            Some(name) => turns.push(ChatTurn::new(
                ChatRole::Assistant,
                format!("{name}: {}", msg.content),
            )),
            None => turns.push(ChatTurn::new(ChatRole::User, msg.content.clone())),
        }
    }

    turns
}
