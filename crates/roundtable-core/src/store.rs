use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{ffi, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::debug;

use crate::conversation::{Agent, Conversation, Message};
use crate::error::StoreError;

pub type Result<T> = std::result::Result<T, StoreError>;

/// The conversation row on its own, without agents or messages.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRecord {
    pub id: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One line of `list_conversations` output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub agent_count: usize,
    pub public_message_count: usize,
}

/// Durable record of conversations, agents and messages in SQLite.
///
/// Append-only: rows are inserted, the conversation's `updated_at` is the
/// only column ever rewritten, and nothing is deleted.
pub struct ConversationStore {
    conn: Mutex<Connection>,
}

impl ConversationStore {
    /// Open (or create) the conversation database.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Private, throwaway database. Used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                topic TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                name TEXT NOT NULL,
                system_prompt TEXT NOT NULL,
                UNIQUE (conversation_id, name)
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                agent_id TEXT REFERENCES agents(id),
                agent_name TEXT,
                content TEXT NOT NULL,
                is_private INTEGER NOT NULL,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_messages_agent ON messages(agent_id);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.lock_conn()?.execute_batch(sql)?;
        Ok(())
    }

    pub fn create_conversation(
        &self,
        id: &str,
        topic: &str,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        insert_conversation(&conn, id, topic, created_at, updated_at)?;
        debug!("Stored conversation {id}");
        Ok(())
    }

    pub fn create_agent(
        &self,
        id: &str,
        conversation_id: &str,
        name: &str,
        system_prompt: &str,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        insert_agent(&conn, id, conversation_id, name, system_prompt)
    }

    /// Append a message. The conversation must exist, and an authored
    /// message must come from an agent of that same conversation.
    pub fn create_message(&self, msg: &Message) -> Result<()> {
        let conn = self.lock_conn()?;
        insert_message(&conn, msg)
    }

    /// Persist a freshly built aggregate (conversation row, agents, then
    /// messages) in one transaction. Either all of it lands or none of it.
    pub fn create_conversation_with_agents(&self, conversation: &Conversation) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        insert_conversation(
            &tx,
            &conversation.id,
            &conversation.topic,
            conversation.created_at,
            conversation.updated_at,
        )?;
        for agent in &conversation.agents {
            insert_agent(
                &tx,
                &agent.id,
                &conversation.id,
                &agent.name,
                &agent.system_prompt,
            )?;
        }
        for msg in conversation
            .messages
            .iter()
            .chain(conversation.agents.iter().flat_map(|a| &a.private_thoughts))
        {
            insert_message(&tx, msg)?;
        }

        tx.commit()?;
        debug!(
            "Stored conversation {} with {} agents",
            conversation.id,
            conversation.agents.len()
        );
        Ok(())
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRecord>> {
        let conn = self.lock_conn()?;
        let record = conn
            .query_row(
                "SELECT id, topic, created_at, updated_at FROM conversations WHERE id = ?1",
                [id],
                |row| {
                    Ok(ConversationRecord {
                        id: row.get(0)?,
                        topic: row.get(1)?,
                        created_at: ts_column(row, 2)?,
                        updated_at: ts_column(row, 3)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Agents of a conversation in creation order, private thoughts unloaded.
    pub fn get_agents(&self, conversation_id: &str) -> Result<Vec<Agent>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, system_prompt FROM agents
             WHERE conversation_id = ?1
             ORDER BY rowid",
        )?;
        let agents = stmt
            .query_map([conversation_id], |row| {
                Ok(Agent {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    system_prompt: row.get(2)?,
                    private_thoughts: Vec::new(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(agents)
    }

    /// Public messages, oldest first. Equal timestamps keep insertion order.
    pub fn get_public_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.query_messages(
            "SELECT id, conversation_id, agent_id, agent_name, content, is_private, timestamp
             FROM messages
             WHERE conversation_id = ?1 AND is_private = 0
             ORDER BY timestamp, rowid",
            conversation_id,
        )
    }

    /// One agent's private messages, oldest first.
    pub fn get_private_messages(&self, agent_id: &str) -> Result<Vec<Message>> {
        self.query_messages(
            "SELECT id, conversation_id, agent_id, agent_name, content, is_private, timestamp
             FROM messages
             WHERE agent_id = ?1 AND is_private = 1
             ORDER BY timestamp, rowid",
            agent_id,
        )
    }

    fn query_messages(&self, sql: &str, key: &str) -> Result<Vec<Message>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let messages = stmt
            .query_map([key], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    /// Rebuild the full aggregate, or `None` for an unknown id.
    pub fn load_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let Some(record) = self.get_conversation(id)? else {
            return Ok(None);
        };

        let mut agents = self.get_agents(id)?;
        for agent in &mut agents {
            agent.private_thoughts = self.get_private_messages(&agent.id)?;
        }
        let messages = self.get_public_messages(id)?;

        debug!(
            "Loaded conversation {id}: {} agents, {} public messages",
            agents.len(),
            messages.len()
        );

        Ok(Some(Conversation {
            id: record.id,
            topic: record.topic,
            messages,
            agents,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }))
    }

    pub fn update_conversation_timestamp(&self, id: &str, updated_at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
            rusqlite::params![id, encode_ts(updated_at)],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "conversation",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// All stored conversations, most recently updated first.
    pub fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.topic, c.created_at, c.updated_at,
                    (SELECT COUNT(*) FROM agents a WHERE a.conversation_id = c.id),
                    (SELECT COUNT(*) FROM messages m
                     WHERE m.conversation_id = c.id AND m.is_private = 0)
             FROM conversations c
             ORDER BY c.updated_at DESC, c.rowid DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ConversationSummary {
                    id: row.get(0)?,
                    topic: row.get(1)?,
                    created_at: ts_column(row, 2)?,
                    updated_at: ts_column(row, 3)?,
                    agent_count: row.get::<_, i64>(4)? as usize,
                    public_message_count: row.get::<_, i64>(5)? as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn insert_conversation(
    conn: &Connection,
    id: &str,
    topic: &str,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO conversations (id, topic, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![id, topic, encode_ts(created_at), encode_ts(updated_at)],
    )
    .map_err(|e| classify(e, "conversation", id))?;
    Ok(())
}

fn insert_agent(
    conn: &Connection,
    id: &str,
    conversation_id: &str,
    name: &str,
    system_prompt: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO agents (id, conversation_id, name, system_prompt)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![id, conversation_id, name, system_prompt],
    )
    .map_err(|e| match classify(e, "agent", id) {
        StoreError::ForeignKeyViolation { entity, .. } => StoreError::ForeignKeyViolation {
            entity,
            reference: format!("conversation '{conversation_id}'"),
        },
        StoreError::DuplicateKey { entity, .. } => StoreError::DuplicateKey {
            entity,
            id: format!("{id} ({name})"),
        },
        other => other,
    })?;
    Ok(())
}

fn insert_message(conn: &Connection, msg: &Message) -> Result<()> {
    let conversation_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
        [&msg.conversation_id],
        |row| row.get(0),
    )?;
    if !conversation_exists {
        return Err(StoreError::ForeignKeyViolation {
            entity: "message",
            reference: format!("conversation '{}'", msg.conversation_id),
        });
    }

    if let Some(agent_id) = &msg.agent_id {
        let owner: Option<String> = conn
            .query_row(
                "SELECT conversation_id FROM agents WHERE id = ?1",
                [agent_id],
                |row| row.get(0),
            )
            .optional()?;
        if owner.as_deref() != Some(msg.conversation_id.as_str()) {
            return Err(StoreError::ForeignKeyViolation {
                entity: "message",
                reference: format!(
                    "agent '{agent_id}' in conversation '{}'",
                    msg.conversation_id
                ),
            });
        }
    }

    conn.execute(
        "INSERT INTO messages
            (id, conversation_id, agent_id, agent_name, content, is_private, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            msg.id,
            msg.conversation_id,
            msg.agent_id,
            msg.agent_name,
            msg.content,
            msg.is_private,
            encode_ts(msg.timestamp),
        ],
    )
    .map_err(|e| classify(e, "message", &msg.id))?;
    Ok(())
}

/// Map constraint failures onto the store's integrity errors.
fn classify(err: rusqlite::Error, entity: &'static str, id: &str) -> StoreError {
    if let rusqlite::Error::SqliteFailure(ref failure, _) = err {
        match failure.extended_code {
            ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE => {
                return StoreError::DuplicateKey {
                    entity,
                    id: id.to_string(),
                };
            }
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                return StoreError::ForeignKeyViolation {
                    entity,
                    reference: format!("parent of '{id}'"),
                };
            }
            _ => {}
        }
    }
    StoreError::Sqlite(err)
}

/// RFC 3339 with fixed microsecond precision so text order is time order.
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        agent_id: row.get(2)?,
        agent_name: row.get(3)?,
        content: row.get(4)?,
        is_private: row.get(5)?,
        timestamp: ts_column(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::now_micros;

    fn seeded() -> ConversationStore {
        let store = ConversationStore::open_in_memory().unwrap();
        let now = now_micros();
        store.create_conversation("c1", "rust vs go", now, now).unwrap();
        store.create_agent("a1", "c1", "A", "prompt a").unwrap();
        store.create_agent("a2", "c1", "B", "prompt b").unwrap();
        store
    }

    fn count_messages(store: &ConversationStore) -> i64 {
        let conn = store.lock_conn().unwrap();
        conn.query_row("SELECT count(*) FROM messages", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_duplicate_conversation_rejected() {
        let store = seeded();
        let now = now_micros();
        let err = store
            .create_conversation("c1", "again", now, now)
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { entity: "conversation", .. }));
    }

    #[test]
    fn test_agent_requires_conversation() {
        let store = seeded();
        let err = store.create_agent("a9", "missing", "Z", "p").unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation { entity: "agent", .. }));
    }

    #[test]
    fn test_agent_names_unique_per_conversation() {
        let store = seeded();
        let err = store.create_agent("a3", "c1", "A", "p").unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
    }

    #[test]
    fn test_message_with_unknown_conversation_writes_nothing() {
        let store = seeded();
        let msg = Message::new("missing", None, "hello", false, now_micros());
        let err = store.create_message(&msg).unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation { entity: "message", .. }));
        assert_eq!(count_messages(&store), 0);
    }

    #[test]
    fn test_message_with_foreign_agent_rejected() {
        let store = seeded();
        let now = now_micros();
        store.create_conversation("c2", "other", now, now).unwrap();
        store.create_agent("b1", "c2", "A", "p").unwrap();

        let msg = Message::new("c1", Some(("b1", "A")), "wrong room", false, now);
        let err = store.create_message(&msg).unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation { .. }));

        let msg = Message::new("c1", Some(("ghost", "G")), "nobody", false, now);
        assert!(store.create_message(&msg).is_err());
        assert_eq!(count_messages(&store), 0);
    }

    #[test]
    fn test_public_and_private_partitions() {
        let store = seeded();
        let t0 = now_micros();
        let t1 = t0 + chrono::Duration::milliseconds(5);

        store
            .create_message(&Message::new("c1", None, "seed", false, t0))
            .unwrap();
        store
            .create_message(&Message::new("c1", Some(("a1", "A")), "hi", false, t1))
            .unwrap();
        store
            .create_message(&Message::new("c1", Some(("a1", "A")), "secret a", true, t1))
            .unwrap();
        store
            .create_message(&Message::new("c1", Some(("a2", "B")), "secret b", true, t1))
            .unwrap();

        let public = store.get_public_messages("c1").unwrap();
        let contents: Vec<&str> = public.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["seed", "hi"]);

        let private_a = store.get_private_messages("a1").unwrap();
        assert_eq!(private_a.len(), 1);
        assert_eq!(private_a[0].content, "secret a");
        assert!(private_a[0].is_private);
    }

    #[test]
    fn test_equal_timestamps_keep_insertion_order() {
        let store = seeded();
        let t = now_micros();
        for text in ["first", "second", "third"] {
            store
                .create_message(&Message::new("c1", Some(("a2", "B")), text, false, t))
                .unwrap();
        }
        let public = store.get_public_messages("c1").unwrap();
        let contents: Vec<&str> = public.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_load_conversation_round_trip() {
        let store = seeded();
        let t = now_micros();
        let seed = Message::new("c1", None, "seed", false, t);
        let thought = Message::new("c1", Some(("a2", "B")), "hmm", true, t);
        store.create_message(&seed).unwrap();
        store.create_message(&thought).unwrap();

        let conv = store.load_conversation("c1").unwrap().unwrap();
        assert_eq!(conv.topic, "rust vs go");
        assert_eq!(conv.messages, vec![seed]);
        let names: Vec<&str> = conv.agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert!(conv.agents[0].private_thoughts.is_empty());
        assert_eq!(conv.agents[1].private_thoughts, vec![thought]);
    }

    #[test]
    fn test_load_unknown_conversation_is_none() {
        let store = seeded();
        assert!(store.load_conversation("nope").unwrap().is_none());
        assert!(store.get_conversation("nope").unwrap().is_none());
    }

    #[test]
    fn test_update_timestamp() {
        let store = seeded();
        let later = now_micros() + chrono::Duration::seconds(30);
        store.update_conversation_timestamp("c1", later).unwrap();
        let record = store.get_conversation("c1").unwrap().unwrap();
        assert_eq!(record.updated_at, later);

        let err = store
            .update_conversation_timestamp("nope", later)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_list_conversations_newest_first() {
        let store = seeded();
        let later = now_micros() + chrono::Duration::seconds(60);
        store.create_conversation("c2", "newer", later, later).unwrap();
        store
            .create_message(&Message::new("c1", None, "seed", false, now_micros()))
            .unwrap();

        let list = store.list_conversations().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "c2");
        assert_eq!(list[1].id, "c1");
        assert_eq!(list[1].agent_count, 2);
        assert_eq!(list[1].public_message_count, 1);
    }

    #[test]
    fn test_reopen_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("conversations.sqlite");
        {
            let store = ConversationStore::open(&path).unwrap();
            let now = now_micros();
            store.create_conversation("c1", "persisted", now, now).unwrap();
        }
        let store = ConversationStore::open(&path).unwrap();
        let record = store.get_conversation("c1").unwrap().unwrap();
        assert_eq!(record.topic, "persisted");
    }

    fn fresh_aggregate(id: &str, names: &[&str]) -> Conversation {
        let now = now_micros();
        let agents: Vec<Agent> = names
            .iter()
            .enumerate()
            .map(|(i, name)| Agent {
                id: format!("{id}-agent-{i}"),
                name: name.to_string(),
                system_prompt: "p".into(),
                private_thoughts: Vec::new(),
            })
            .collect();
        Conversation {
            id: id.into(),
            topic: "atomic".into(),
            messages: vec![Message::new(id, None, "seed", false, now)],
            agents,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_create_with_agents_round_trip() {
        let store = ConversationStore::open_in_memory().unwrap();
        let conv = fresh_aggregate("c1", &["A", "B", "C"]);
        store.create_conversation_with_agents(&conv).unwrap();
        assert_eq!(store.load_conversation("c1").unwrap().unwrap(), conv);
    }

    #[test]
    fn test_create_with_agents_rolls_back_on_duplicate_name() {
        let store = ConversationStore::open_in_memory().unwrap();
        let conv = fresh_aggregate("c1", &["A", "B", "A"]);
        let err = store.create_conversation_with_agents(&conv).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { entity: "agent", .. }));

        assert!(store.get_conversation("c1").unwrap().is_none());
        assert!(store.get_agents("c1").unwrap().is_empty());
        assert!(store.list_conversations().unwrap().is_empty());
        assert_eq!(count_messages(&store), 0);
    }

    #[test]
    fn test_create_with_agents_rolls_back_when_agent_insert_aborts() {
        let store = ConversationStore::open_in_memory().unwrap();
        store
            .execute_batch(
                "CREATE TRIGGER reject_b BEFORE INSERT ON agents
                 WHEN NEW.name = 'B'
                 BEGIN SELECT RAISE(ABORT, 'agent B rejected'); END;",
            )
            .unwrap();

        let conv = fresh_aggregate("c1", &["A", "B", "C"]);
        assert!(store.create_conversation_with_agents(&conv).is_err());
        assert!(store.list_conversations().unwrap().is_empty());
        assert!(store.get_agents("c1").unwrap().is_empty());

        // The connection is usable again afterwards
        let ok = fresh_aggregate("c2", &["A"]);
        store.create_conversation_with_agents(&ok).unwrap();
        assert_eq!(store.list_conversations().unwrap().len(), 1);
    }
}
