use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use spilka_types::models::Conversation;

use crate::Database;
use crate::models::{CONVERSATION_COLS, conversation_from_row};

impl Database {
    pub fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| get_conversation(conn, id))
    }

    pub fn find_direct_for_pair(&self, a: Uuid, b: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLS} FROM conversations WHERE direct_key = ?1"
            ))?;
            let conversation = stmt
                .query_row(params![direct_key(a, b)], conversation_from_row)
                .optional()?;
            Ok(conversation)
        })
    }

    /// Conversations the user actively participates in, most recent first.
    pub fn conversations_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLS} FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ?1 AND p.is_active = 1
                 ORDER BY COALESCE(c.last_message_at, c.created_at) DESC"
            ))?;
            let rows = stmt
                .query_map(params![user_id.to_string()], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

/// Canonical key for the unordered user pair of a direct conversation.
pub fn direct_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

pub fn get_conversation(conn: &Connection, id: Uuid) -> Result<Option<Conversation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CONVERSATION_COLS} FROM conversations WHERE id = ?1"
    ))?;
    let conversation = stmt
        .query_row(params![id.to_string()], conversation_from_row)
        .optional()?;
    Ok(conversation)
}

pub fn insert_conversation(
    conn: &Connection,
    c: &Conversation,
    direct_key: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO conversations (id, kind, name, description, avatar_url, created_by, \
         is_active, allow_replies, participant_count, pinned_message_ids, direct_key, \
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            c.id.to_string(),
            c.kind.as_str(),
            c.name,
            c.description,
            c.avatar_url,
            c.created_by.to_string(),
            c.is_active,
            c.allow_replies,
            c.participant_count,
            serde_json::to_string(&c.pinned_message_ids)?,
            direct_key,
            c.created_at,
            c.updated_at,
        ],
    )?;
    Ok(())
}

pub fn touch_last_message(
    conn: &Connection,
    conversation_id: Uuid,
    at: DateTime<Utc>,
    preview: &str,
    sender_id: Uuid,
) -> Result<()> {
    conn.execute(
        "UPDATE conversations
         SET last_message_at = ?2, last_message_preview = ?3, last_message_sender_id = ?4,
             updated_at = ?2
         WHERE id = ?1",
        params![conversation_id.to_string(), at, preview, sender_id.to_string()],
    )?;
    Ok(())
}

/// Atomic relative update; concurrent senders must never lose increments to
/// a read-modify-write on a stale value.
pub fn adjust_participant_count(conn: &Connection, id: Uuid, delta: i64) -> Result<()> {
    conn.execute(
        "UPDATE conversations
         SET participant_count = participant_count + ?2, updated_at = ?3
         WHERE id = ?1",
        params![id.to_string(), delta, Utc::now()],
    )?;
    Ok(())
}

pub fn participant_count(conn: &Connection, id: Uuid) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT participant_count FROM conversations WHERE id = ?1",
        params![id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn set_conversation_active(conn: &Connection, id: Uuid, active: bool) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), active, Utc::now()],
    )?;
    Ok(())
}
