use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use spilka_types::api::ParticipantInfo;
use spilka_types::models::Participant;

use crate::Database;
use crate::models::{PARTICIPANT_COLS, participant_from_row, participant_info_from_row};

impl Database {
    /// Participant row for `(conversation, user)`, active or not.
    pub fn get_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participant>> {
        self.with_conn(|conn| get_participant(conn, conversation_id, user_id))
    }

    pub fn active_participants(&self, conversation_id: Uuid) -> Result<Vec<Participant>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PARTICIPANT_COLS} FROM conversation_participants
                 WHERE conversation_id = ?1 AND is_active = 1
                 ORDER BY joined_at"
            ))?;
            let rows = stmt
                .query_map(params![conversation_id.to_string()], participant_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Active roster joined with public user-profile fields only.
    pub fn roster(&self, conversation_id: Uuid) -> Result<Vec<ParticipantInfo>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.user_id, p.role, p.is_muted, p.joined_at,
                        u.first_name, u.last_name, u.avatar_url, u.membership_role
                 FROM conversation_participants p
                 JOIN users u ON u.id = p.user_id
                 WHERE p.conversation_id = ?1 AND p.is_active = 1
                 ORDER BY p.joined_at",
            )?;
            let rows = stmt
                .query_map(params![conversation_id.to_string()], participant_info_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn mark_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversation_participants
                 SET last_read_at = ?3, unread_count = 0
                 WHERE conversation_id = ?1 AND user_id = ?2 AND is_active = 1",
                params![conversation_id.to_string(), user_id.to_string(), at],
            )?;
            Ok(())
        })
    }
}

pub fn get_participant(
    conn: &Connection,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<Option<Participant>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PARTICIPANT_COLS} FROM conversation_participants
         WHERE conversation_id = ?1 AND user_id = ?2"
    ))?;
    let participant = stmt
        .query_row(
            params![conversation_id.to_string(), user_id.to_string()],
            participant_from_row,
        )
        .optional()?;
    Ok(participant)
}

pub fn insert_participant(conn: &Connection, p: &Participant) -> Result<()> {
    conn.execute(
        "INSERT INTO conversation_participants (id, conversation_id, user_id, role, is_muted, \
         last_read_at, unread_count, is_active, joined_at, left_at, removed_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            p.id.to_string(),
            p.conversation_id.to_string(),
            p.user_id.to_string(),
            p.role.as_str(),
            p.is_muted,
            p.last_read_at,
            p.unread_count,
            p.is_active,
            p.joined_at,
            p.left_at,
            p.removed_by.map(|u| u.to_string()),
        ],
    )?;
    Ok(())
}

/// A user rejoining a conversation reuses their previous row instead of
/// creating a duplicate.
pub fn reactivate_participant(conn: &Connection, id: Uuid, joined_at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE conversation_participants
         SET is_active = 1, left_at = NULL, removed_by = NULL, joined_at = ?2,
             unread_count = 0, role = 'member'
         WHERE id = ?1",
        params![id.to_string(), joined_at],
    )?;
    Ok(())
}

pub fn mark_left(
    conn: &Connection,
    id: Uuid,
    left_at: DateTime<Utc>,
    removed_by: Option<Uuid>,
) -> Result<()> {
    conn.execute(
        "UPDATE conversation_participants
         SET is_active = 0, left_at = ?2, removed_by = ?3
         WHERE id = ?1",
        params![id.to_string(), left_at, removed_by.map(|u| u.to_string())],
    )?;
    Ok(())
}

/// Atomic unread bump for every other active participant of a conversation.
pub fn bump_unread(conn: &Connection, conversation_id: Uuid, sender_id: Uuid) -> Result<()> {
    conn.execute(
        "UPDATE conversation_participants
         SET unread_count = unread_count + 1
         WHERE conversation_id = ?1 AND user_id != ?2 AND is_active = 1",
        params![conversation_id.to_string(), sender_id.to_string()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rusqlite::params;
    use uuid::Uuid;

    use spilka_types::models::{Participant, ParticipantRole};

    use crate::Database;

    fn seed_user(db: &Database, id: Uuid) {
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, first_name, last_name, membership_role, staff_role, created_at)
                 VALUES (?1, 'Тест', 'Користувач', 'member', 'none', ?2)",
                params![id.to_string(), Utc::now()],
            )?;
            Ok(())
        })
        .unwrap();
    }

    fn seed_conversation(db: &Database, id: Uuid, created_by: Uuid) {
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, kind, created_by, participant_count, created_at, updated_at)
                 VALUES (?1, 'group', ?2, 0, ?3, ?3)",
                params![id.to_string(), created_by.to_string(), Utc::now()],
            )?;
            Ok(())
        })
        .unwrap();
    }

    fn participant(conversation_id: Uuid, user_id: Uuid, active: bool) -> Participant {
        Participant {
            id: Uuid::new_v4(),
            conversation_id,
            user_id,
            role: ParticipantRole::Member,
            is_muted: false,
            last_read_at: None,
            unread_count: 0,
            is_active: active,
            joined_at: Utc::now(),
            left_at: None,
            removed_by: None,
        }
    }

    #[test]
    fn unread_bump_skips_sender_and_inactive_rows() {
        let db = Database::open_in_memory().unwrap();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        for id in [a, b, c] {
            seed_user(&db, id);
        }
        let conversation = Uuid::new_v4();
        seed_conversation(&db, conversation, a);
        db.with_conn(|conn| {
            super::insert_participant(conn, &participant(conversation, a, true))?;
            super::insert_participant(conn, &participant(conversation, b, true))?;
            super::insert_participant(conn, &participant(conversation, c, false))?;
            super::bump_unread(conn, conversation, a)?;
            Ok(())
        })
        .unwrap();

        assert_eq!(db.get_participant(conversation, a).unwrap().unwrap().unread_count, 0);
        assert_eq!(db.get_participant(conversation, b).unwrap().unwrap().unread_count, 1);
        assert_eq!(db.get_participant(conversation, c).unwrap().unwrap().unread_count, 0);
    }

    #[test]
    fn mark_read_resets_counter() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        seed_user(&db, a);
        seed_user(&db, b);
        let conversation = Uuid::new_v4();
        seed_conversation(&db, conversation, a);
        db.with_conn(|conn| {
            super::insert_participant(conn, &participant(conversation, a, true))?;
            super::insert_participant(conn, &participant(conversation, b, true))?;
            super::bump_unread(conn, conversation, a)?;
            Ok(())
        })
        .unwrap();

        db.mark_read(conversation, b, Utc::now()).unwrap();
        let row = db.get_participant(conversation, b).unwrap().unwrap();
        assert_eq!(row.unread_count, 0);
        assert!(row.last_read_at.is_some());
    }
}
