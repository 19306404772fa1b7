//! Row -> domain mapping.
//!
//! Column lists and `*_from_row` mappers are kept together so every query
//! selecting an entity uses the same column order.

use std::str::FromStr;

use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use spilka_types::api::ParticipantInfo;
use spilka_types::models::{Attachment, Conversation, Message, Participant, UserProfile};

pub const USER_COLS: &str =
    "id, first_name, last_name, avatar_url, membership_role, staff_role, referred_by_id, group_id";

pub const CONVERSATION_COLS: &str = "id, kind, name, description, avatar_url, created_by, \
     is_active, allow_replies, participant_count, last_message_at, last_message_preview, \
     last_message_sender_id, pinned_message_ids, created_at, updated_at";

pub const PARTICIPANT_COLS: &str = "id, conversation_id, user_id, role, is_muted, last_read_at, \
     unread_count, is_active, joined_at, left_at, removed_by";

pub const MESSAGE_COLS: &str = "id, conversation_id, sender_id, kind, content, attachments, \
     reply_to_id, is_edited, edited_at, is_deleted, deleted_at, deleted_by, pinned_at, pinned_by, \
     forwarded_from_message_id, forwarded_from_conversation_id, created_at, updated_at";

fn bad_col(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| bad_col(idx, e))
}

pub(crate) fn opt_uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| s.parse().map_err(|e| bad_col(idx, e))).transpose()
}

pub(crate) fn enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| bad_col(idx, e))
}

pub(crate) fn json_col<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| bad_col(idx, e))
}

pub fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        id: uuid_col(row, 0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        avatar_url: row.get(3)?,
        membership_role: enum_col(row, 4)?,
        staff_role: enum_col(row, 5)?,
        referred_by_id: opt_uuid_col(row, 6)?,
        group_id: opt_uuid_col(row, 7)?,
    })
}

pub fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: uuid_col(row, 0)?,
        kind: enum_col(row, 1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        avatar_url: row.get(4)?,
        created_by: uuid_col(row, 5)?,
        is_active: row.get(6)?,
        allow_replies: row.get(7)?,
        participant_count: row.get(8)?,
        last_message_at: row.get(9)?,
        last_message_preview: row.get(10)?,
        last_message_sender_id: opt_uuid_col(row, 11)?,
        pinned_message_ids: json_col::<Vec<Uuid>>(row, 12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

pub fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        id: uuid_col(row, 0)?,
        conversation_id: uuid_col(row, 1)?,
        user_id: uuid_col(row, 2)?,
        role: enum_col(row, 3)?,
        is_muted: row.get(4)?,
        last_read_at: row.get(5)?,
        unread_count: row.get(6)?,
        is_active: row.get(7)?,
        joined_at: row.get(8)?,
        left_at: row.get(9)?,
        removed_by: opt_uuid_col(row, 10)?,
    })
}

pub fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_col(row, 0)?,
        conversation_id: uuid_col(row, 1)?,
        sender_id: opt_uuid_col(row, 2)?,
        kind: enum_col(row, 3)?,
        content: row.get(4)?,
        attachments: json_col::<Vec<Attachment>>(row, 5)?,
        reply_to_id: opt_uuid_col(row, 6)?,
        is_edited: row.get(7)?,
        edited_at: row.get(8)?,
        is_deleted: row.get(9)?,
        deleted_at: row.get(10)?,
        deleted_by: opt_uuid_col(row, 11)?,
        pinned_at: row.get(12)?,
        pinned_by: opt_uuid_col(row, 13)?,
        forwarded_from_message_id: opt_uuid_col(row, 14)?,
        forwarded_from_conversation_id: opt_uuid_col(row, 15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

/// Roster rows select participant columns followed by the public user
/// profile columns (first_name, last_name, avatar_url, membership_role).
pub fn participant_info_from_row(row: &Row<'_>) -> rusqlite::Result<ParticipantInfo> {
    Ok(ParticipantInfo {
        user_id: uuid_col(row, 0)?,
        role: enum_col(row, 1)?,
        is_muted: row.get(2)?,
        joined_at: row.get(3)?,
        first_name: row.get(4)?,
        last_name: row.get(5)?,
        avatar_url: row.get(6)?,
        membership_role: enum_col(row, 7)?,
    })
}
