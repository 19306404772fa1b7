use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use spilka_types::models::Message;

use crate::Database;
use crate::models::{MESSAGE_COLS, message_from_row};

impl Database {
    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| get_message(conn, id))
    }

    /// Cursor-based pagination: pass the `created_at` of the oldest message
    /// from the previous page to fetch older messages. Newest first.
    pub fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLS} FROM messages
                 WHERE conversation_id = ?1 AND (?2 IS NULL OR created_at < ?2)
                 ORDER BY created_at DESC
                 LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(
                    params![conversation_id.to_string(), before, limit],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

pub fn get_message(conn: &Connection, id: Uuid) -> Result<Option<Message>> {
    let mut stmt = conn.prepare(&format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1"))?;
    let message = stmt
        .query_row(params![id.to_string()], message_from_row)
        .optional()?;
    Ok(message)
}

pub fn insert_message(conn: &Connection, m: &Message) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, kind, content, attachments, \
         reply_to_id, is_edited, edited_at, is_deleted, deleted_at, deleted_by, pinned_at, \
         pinned_by, forwarded_from_message_id, forwarded_from_conversation_id, created_at, \
         updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            m.id.to_string(),
            m.conversation_id.to_string(),
            m.sender_id.map(|u| u.to_string()),
            m.kind.as_str(),
            m.content,
            serde_json::to_string(&m.attachments)?,
            m.reply_to_id.map(|u| u.to_string()),
            m.is_edited,
            m.edited_at,
            m.is_deleted,
            m.deleted_at,
            m.deleted_by.map(|u| u.to_string()),
            m.pinned_at,
            m.pinned_by.map(|u| u.to_string()),
            m.forwarded_from_message_id.map(|u| u.to_string()),
            m.forwarded_from_conversation_id.map(|u| u.to_string()),
            m.created_at,
            m.updated_at,
        ],
    )?;
    Ok(())
}

pub fn apply_edit(
    conn: &Connection,
    id: Uuid,
    content: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE messages
         SET content = ?2, is_edited = 1, edited_at = ?3, updated_at = ?3
         WHERE id = ?1",
        params![id.to_string(), content, at],
    )?;
    Ok(())
}

/// Soft delete: the row and its timestamps survive for thread integrity,
/// only the payload is cleared.
pub fn apply_delete(conn: &Connection, id: Uuid, at: DateTime<Utc>, by: Uuid) -> Result<()> {
    conn.execute(
        "UPDATE messages
         SET content = NULL, attachments = '[]', is_deleted = 1, deleted_at = ?2,
             deleted_by = ?3, updated_at = ?2
         WHERE id = ?1",
        params![id.to_string(), at, by.to_string()],
    )?;
    Ok(())
}
