use roundtable_config::{DiscussionConfig, DEFAULT_SYSTEM_PROMPT};
use tracing::{debug, info};

use crate::backend::ModelAdapter;
use crate::conversation::{agent_name, now_micros, Agent, Conversation, Message};
use crate::error::EngineError;
use crate::store::ConversationStore;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Knobs the engine applies to every conversation it creates.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Baseline prompt given to every agent.
    pub system_prompt: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &DiscussionConfig) -> Self {
        if config.system_prompt.trim().is_empty() {
            Self::default()
        } else {
            Self {
                system_prompt: config.system_prompt.clone(),
            }
        }
    }
}

/// Drives conversation creation and the round-robin turn loop.
///
/// Owns the store and the adapter for its lifetime. Turns run strictly one
/// after another so each agent sees every earlier reply, including replies
/// from earlier in the same turn.
pub struct TurnEngine {
    store: ConversationStore,
    adapter: ModelAdapter,
    settings: EngineSettings,
}

impl TurnEngine {
    pub fn new(store: ConversationStore, adapter: ModelAdapter, settings: EngineSettings) -> Self {
        Self {
            store,
            adapter,
            settings,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn adapter(&self) -> &ModelAdapter {
        &self.adapter
    }

    /// Create and persist a conversation with `agent_count` agents named
    /// A, B, ... and a seed message announcing the topic.
    pub fn create_conversation(&self, topic: &str, agent_count: usize) -> Result<Conversation> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_micros();

        let agents = (0..agent_count)
            .map(|index| Agent {
                id: uuid::Uuid::new_v4().to_string(),
                name: agent_name(index),
                system_prompt: self.settings.system_prompt.clone(),
                private_thoughts: Vec::new(),
            })
            .collect();
        let seed = Message::new(&id, None, &seed_message(topic), false, now);

        let conversation = Conversation {
            id,
            topic: topic.to_string(),
            messages: vec![seed],
            agents,
            created_at: now,
            updated_at: now,
        };
        self.store.create_conversation_with_agents(&conversation)?;

        info!(
            "Created conversation {} with {agent_count} agents: {topic}",
            conversation.id
        );
        Ok(conversation)
    }

    pub fn load_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.store.load_conversation(id)?)
    }

    /// Run `turns` full rounds: every agent replies once per round, in
    /// creation order.
    pub async fn run_conversation(&self, conversation: &mut Conversation, turns: usize) -> Result<()> {
        self.run_conversation_with(conversation, turns, |_| {}).await
    }

    /// Like `run_conversation`, calling `on_reply` after each committed
    /// public reply.
    pub async fn run_conversation_with<F>(
        &self,
        conversation: &mut Conversation,
        turns: usize,
        mut on_reply: F,
    ) -> Result<()>
    where
        F: FnMut(&Message),
    {
        for turn in 0..turns {
            info!(
                "Conversation {}: turn {}/{turns}",
                conversation.id,
                turn + 1
            );
            for index in 0..conversation.agents.len() {
                let reply = self.generate_agent_response(conversation, index).await?;
                on_reply(reply);
            }
        }
        Ok(())
    }

    /// One agent's turn: build its context from the store, ask the backend,
    /// then commit the public reply and private thought.
    ///
    /// Store failures abort the turn; whatever was already written stays.
    pub async fn generate_agent_response<'c>(
        &self,
        conversation: &'c mut Conversation,
        agent_index: usize,
    ) -> Result<&'c Message> {
        let count = conversation.agents.len();
        let agent = conversation
            .agents
            .get(agent_index)
            .ok_or(EngineError::AgentIndexOutOfRange {
                index: agent_index,
                count,
            })?;
        let agent_id = agent.id.clone();
        let name = agent.name.clone();
        let system_prompt = agent.system_prompt.clone();

        let public_history = self.store.get_public_messages(&conversation.id)?;
        let private_history = self.store.get_private_messages(&agent_id)?;

        let response = self
            .adapter
            .generate(&name, &system_prompt, &public_history, &private_history)
            .await;

        let now = now_micros();
        let author = Some((agent_id.as_str(), name.as_str()));
        let public = Message::new(
            &conversation.id,
            author,
            &response.public_response,
            false,
            now,
        );
        let private = Message::new(
            &conversation.id,
            author,
            &response.private_thoughts,
            true,
            now,
        );

        self.store.create_message(&public)?;
        self.store.create_message(&private)?;

        conversation.agents[agent_index].private_thoughts.push(private);
        conversation.messages.push(public);
        conversation.touch(now);
        self.store
            .update_conversation_timestamp(&conversation.id, conversation.updated_at)?;

        debug!(
            "Agent {name} replied in conversation {} ({} chars public)",
            conversation.id,
            response.public_response.len()
        );

        let last = conversation.messages.len() - 1;
        Ok(&conversation.messages[last])
    }
}

fn seed_message(topic: &str) -> String {
    format!("Let's discuss the following topic: {topic}")
}
