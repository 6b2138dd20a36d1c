use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::history_db::schema::{Conversation, StoredMessage, DEFAULT_TITLE};

pub struct ConversationStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl ConversationStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    /// Existing conversation for `id`, or a new one. A supplied id that is not
    /// a known conversation becomes the id of the new record.
    pub fn get_or_create(&self, id: Option<&str>) -> anyhow::Result<Conversation> {
        if let Some(id) = id.filter(|id| !id.trim().is_empty()) {
            if let Some(existing) = self.get_conversation(id)? {
                return Ok(existing);
            }
            return self.create_with_id(id);
        }
        self.create_with_id(&Uuid::new_v4().to_string())
    }

    fn create_with_id(&self, id: &str) -> anyhow::Result<Conversation> {
        let now = Utc::now();
        {
            let conn = self.get_conn()?;
            conn.execute(
                "INSERT INTO conversations (id, title, created_utc, updated_utc) VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(id) DO NOTHING",
                params![id, DEFAULT_TITLE, now.to_rfc3339()],
            )?;
        }
        info!("Created conversation {}", id);
        // a concurrent creator may have won the insert
        self.get_conversation(id)?
            .ok_or_else(|| anyhow::anyhow!("Conversation {} vanished after insert", id))
    }

    pub fn get_conversation(&self, id: &str) -> anyhow::Result<Option<Conversation>> {
        let conn = self.get_conn()?;
        let conversation = conn
            .query_row(
                "SELECT id, title, created_utc, updated_utc FROM conversations WHERE id = ?1",
                [id],
                row_to_conversation,
            )
            .optional()?;
        Ok(conversation)
    }

    /// Most recently updated first.
    pub fn list_conversations(&self, limit: usize) -> anyhow::Result<Vec<Conversation>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, created_utc, updated_utc FROM conversations
             ORDER BY updated_utc DESC, id LIMIT ?1",
        )?;
        let conversations = stmt
            .query_map([limit as i64], row_to_conversation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(conversations)
    }

    pub fn add_message(&self, conversation_id: &str, role: &str, content: &str) -> anyhow::Result<StoredMessage> {
        let mut stored = self.add_messages(conversation_id, &[(role, content)])?;
        stored
            .pop()
            .ok_or_else(|| anyhow::anyhow!("No message stored for {}", conversation_id))
    }

    /// Append messages in order within one transaction and touch the
    /// conversation's update time.
    pub fn add_messages(&self, conversation_id: &str, messages: &[(&str, &str)]) -> anyhow::Result<Vec<StoredMessage>> {
        let mut conn = self.get_conn()?;
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let mut stored = Vec::with_capacity(messages.len());

        let tx = conn.transaction()?;
        let touched = tx.execute(
            "UPDATE conversations SET updated_utc = ?1 WHERE id = ?2",
            params![&now_str, conversation_id],
        )?;
        if touched == 0 {
            anyhow::bail!("Unknown conversation {}", conversation_id);
        }
        for (role, content) in messages {
            tx.execute(
                "INSERT INTO messages (conversation_id, role, content, created_utc) VALUES (?1, ?2, ?3, ?4)",
                params![conversation_id, role, content, &now_str],
            )?;
            stored.push(StoredMessage {
                id: tx.last_insert_rowid(),
                conversation_id: conversation_id.to_string(),
                role: role.to_string(),
                content: content.to_string(),
                created_utc: now,
            });
        }
        tx.commit()?;

        debug!("Stored {} messages for conversation {}", stored.len(), conversation_id);
        Ok(stored)
    }

    /// All messages, oldest first.
    pub fn list_messages(&self, conversation_id: &str) -> anyhow::Result<Vec<StoredMessage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, content, created_utc FROM messages
             WHERE conversation_id = ?1 ORDER BY id",
        )?;
        let messages = stmt
            .query_map([conversation_id], row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// The newest `limit` user/assistant messages, oldest first. Other roles
    /// are skipped before the limit applies.
    pub fn recent_dialogue(&self, conversation_id: &str, limit: usize) -> anyhow::Result<Vec<StoredMessage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, content, created_utc FROM (
                 SELECT * FROM messages
                 WHERE conversation_id = ?1 AND role IN ('user', 'assistant')
                 ORDER BY id DESC LIMIT ?2
             ) ORDER BY id",
        )?;
        let messages = stmt
            .query_map(params![conversation_id, limit as i64], row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    pub fn ping(&self) -> anyhow::Result<()> {
        let conn = self.get_conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

fn parse_datetime(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("Unparseable timestamp '{}': {}", value, e);
            DateTime::<Utc>::default()
        })
}

fn row_to_conversation(row: &Row) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        created_utc: parse_datetime(&row.get::<_, String>(2)?),
        updated_utc: parse_datetime(&row.get::<_, String>(3)?),
    })
}

fn row_to_message(row: &Row) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_utc: parse_datetime(&row.get::<_, String>(4)?),
    })
}

#[cfg(test)]
mod tests {
    use crate::history_db::HistoryDatabase;

    #[test]
    fn test_get_or_create_reuses_and_adopts_ids() {
        let db = HistoryDatabase::new_in_memory().unwrap();
        let fresh = db.conversations.get_or_create(None).unwrap();
        assert_eq!(fresh.title, "New Chat");
        assert_eq!(db.conversations.get_or_create(Some(&fresh.id)).unwrap().id, fresh.id);

        let adopted = db.conversations.get_or_create(Some("client-chosen")).unwrap();
        assert_eq!(adopted.id, "client-chosen");
        assert_eq!(db.conversations.list_conversations(10).unwrap().len(), 2);
    }

    #[test]
    fn test_messages_kept_in_insert_order() {
        let db = HistoryDatabase::new_in_memory().unwrap();
        let conv = db.conversations.get_or_create(None).unwrap();
        db.conversations.add_message(&conv.id, "user", "first").unwrap();
        db.conversations
            .add_messages(&conv.id, &[("user", "second"), ("tool", "lookup"), ("assistant", "third")])
            .unwrap();

        let all: Vec<String> = db
            .conversations
            .list_messages(&conv.id)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(all, vec!["first", "second", "lookup", "third"]);

        let recent = db.conversations.recent_dialogue(&conv.id, 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "second");
        assert_eq!(recent[1].role, "assistant");
    }

    #[test]
    fn test_add_message_to_unknown_conversation_fails() {
        let db = HistoryDatabase::new_in_memory().unwrap();
        assert!(db.conversations.add_message("missing", "user", "hi").is_err());
        assert!(db.conversations.list_messages("missing").unwrap().is_empty());
    }

    #[test]
    fn test_file_database_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.db");
        let id = {
            let db = HistoryDatabase::new(&path).unwrap();
            let conv = db.conversations.get_or_create(None).unwrap();
            db.conversations.add_message(&conv.id, "user", "kept").unwrap();
            conv.id
        };
        let reopened = HistoryDatabase::new(&path).unwrap();
        assert_eq!(reopened.conversations.list_messages(&id).unwrap()[0].content, "kept");
    }
}
