use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;

/// Current time at the precision the store keeps, so an aggregate built
/// in memory compares equal to the same aggregate reloaded from disk.
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Spreadsheet-style display name for the agent at `index`:
/// 0 -> "A", 25 -> "Z", 26 -> "AA", 51 -> "AZ", 52 -> "BA".
pub fn agent_name(index: usize) -> String {
    let mut letters = Vec::new();
    let mut n = index + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// A single immutable entry in a conversation, public or private.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    /// `None` for system-authored messages such as the topic seed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub content: String,
    pub is_private: bool,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Build a message with a fresh identity.
    pub fn new(
        conversation_id: &str,
        author: Option<(&str, &str)>,
        content: &str,
        is_private: bool,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            agent_id: author.map(|(id, _)| id.to_string()),
            agent_name: author.map(|(_, name)| name.to_string()),
            content: content.to_string(),
            is_private,
            timestamp,
        }
    }

    pub fn is_system(&self) -> bool {
        self.agent_id.is_none()
    }
}

/// A participant with a fixed name and prompt plus its own private memory.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub system_prompt: String,
    /// Chronological; only ever shown to this agent.
    pub private_thoughts: Vec<Message>,
}

/// In-memory aggregate of a conversation.
///
/// The aggregate is owned by whoever drives the turn loop. The engine
/// mutates it in place and mirrors every change into the store, so a
/// reload from the store yields an equal value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub topic: String,
    /// Public messages only, in turn order.
    pub messages: Vec<Message>,
    /// Fixed membership, creation order.
    pub agents: Vec<Agent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// Move `updated_at` forward to `now`; never backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// Number of public messages written by agents (the seed excluded).
    pub fn reply_count(&self) -> usize {
        self.messages.iter().filter(|m| !m.is_system()).count()
    }

    /// Render the transcript as markdown, optionally followed by each
    /// agent's private thoughts.
    pub fn to_markdown(&self, include_private: bool) -> String {
        let mut out = format!("# {}\n\n", self.topic);
        out.push_str(&format!(
            "_Conversation `{}` with {} agents, started {}_\n\n",
            self.id,
            self.agents.len(),
            self.created_at.format("%Y-%m-%d %H:%M UTC")
        ));

        for msg in &self.messages {
            match msg.agent_name.as_deref() {
                Some(name) => out.push_str(&format!("**{name}**: {}\n\n", msg.content)),
                None => out.push_str(&format!("*{}*\n\n", msg.content)),
            }
        }

        if include_private {
            for agent in &self.agents {
                out.push_str(&format!("## Private thoughts of {}\n\n", agent.name));
                if agent.private_thoughts.is_empty() {
                    out.push_str("_(none yet)_\n\n");
                }
                for thought in &agent.private_thoughts {
                    out.push_str(&format!("- {}\n", thought.content));
                }
                out.push('\n');
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_name_sequence() {
        assert_eq!(agent_name(0), "A");
        assert_eq!(agent_name(1), "B");
        assert_eq!(agent_name(25), "Z");
        assert_eq!(agent_name(26), "AA");
        assert_eq!(agent_name(27), "AB");
        assert_eq!(agent_name(51), "AZ");
        assert_eq!(agent_name(52), "BA");
        assert_eq!(agent_name(701), "ZZ");
        assert_eq!(agent_name(702), "AAA");
    }

    #[test]
    fn test_agent_names_distinct() {
        let names: std::collections::HashSet<String> = (0..2000).map(agent_name).collect();
        assert_eq!(names.len(), 2000);
    }

    fn sample() -> Conversation {
        let now = Utc::now();
        let seed = Message::new("c1", None, "Topic: tabs vs spaces", false, now);
        let reply = Message::new("c1", Some(("a1", "A")), "Tabs, obviously.", false, now);
        let thought = Message::new("c1", Some(("a1", "A")), "B will push back.", true, now);
        Conversation {
            id: "c1".into(),
            topic: "tabs vs spaces".into(),
            messages: vec![seed, reply],
            agents: vec![Agent {
                id: "a1".into(),
                name: "A".into(),
                system_prompt: "be brief".into(),
                private_thoughts: vec![thought],
            }],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_touch_only_moves_forward() {
        let mut conv = sample();
        let before = conv.updated_at;
        conv.touch(before - chrono::Duration::seconds(10));
        assert_eq!(conv.updated_at, before);
        conv.touch(before + chrono::Duration::seconds(10));
        assert!(conv.updated_at > before);
    }

    #[test]
    fn test_reply_count_skips_seed() {
        assert_eq!(sample().reply_count(), 1);
    }

    #[test]
    fn test_markdown_hides_private_by_default() {
        let md = sample().to_markdown(false);
        assert!(md.starts_with("# tabs vs spaces"));
        assert!(md.contains("*Topic: tabs vs spaces*"));
        assert!(md.contains("**A**: Tabs, obviously."));
        assert!(!md.contains("B will push back."));

        let md = sample().to_markdown(true);
        assert!(md.contains("## Private thoughts of A"));
        assert!(md.contains("- B will push back."));
    }

    #[test]
    fn test_json_export_uses_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("createdAt").is_some());
        assert_eq!(json["agents"][0]["systemPrompt"], "be brief");
        assert!(json["messages"][0].get("agentId").is_none());
    }
}
