use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Users and org groups are owned by the external user directory;
        -- messaging only reads them.
        CREATE TABLE IF NOT EXISTS org_groups (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            leader_id   TEXT,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            first_name      TEXT NOT NULL,
            last_name       TEXT NOT NULL,
            avatar_url      TEXT,
            membership_role TEXT NOT NULL DEFAULT 'supporter',
            staff_role      TEXT NOT NULL DEFAULT 'none',
            referred_by_id  TEXT REFERENCES users(id),
            group_id        TEXT REFERENCES org_groups(id),
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_users_referrer
            ON users(referred_by_id);

        CREATE TABLE IF NOT EXISTS conversations (
            id                      TEXT PRIMARY KEY,
            kind                    TEXT NOT NULL CHECK (kind IN ('direct', 'group')),
            name                    TEXT,
            description             TEXT,
            avatar_url              TEXT,
            created_by              TEXT NOT NULL REFERENCES users(id),
            is_active               INTEGER NOT NULL DEFAULT 1,
            allow_replies           INTEGER NOT NULL DEFAULT 1,
            participant_count       INTEGER NOT NULL DEFAULT 0,
            last_message_at         TEXT,
            last_message_preview    TEXT,
            last_message_sender_id  TEXT,
            pinned_message_ids      TEXT NOT NULL DEFAULT '[]',
            -- min(user)||':'||max(user) for direct conversations, NULL for
            -- groups. The unique index is the storage-level backstop for the
            -- one-DM-per-pair invariant.
            direct_key              TEXT,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_direct_key
            ON conversations(direct_key) WHERE direct_key IS NOT NULL;

        CREATE TABLE IF NOT EXISTS conversation_participants (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            user_id         TEXT NOT NULL REFERENCES users(id),
            role            TEXT NOT NULL DEFAULT 'member',
            is_muted        INTEGER NOT NULL DEFAULT 0,
            last_read_at    TEXT,
            unread_count    INTEGER NOT NULL DEFAULT 0,
            is_active       INTEGER NOT NULL DEFAULT 1,
            joined_at       TEXT NOT NULL,
            left_at         TEXT,
            removed_by      TEXT,
            UNIQUE(conversation_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_conversation
            ON conversation_participants(conversation_id);

        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON conversation_participants(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id                              TEXT PRIMARY KEY,
            conversation_id                 TEXT NOT NULL REFERENCES conversations(id),
            sender_id                       TEXT REFERENCES users(id),
            kind                            TEXT NOT NULL DEFAULT 'text',
            content                         TEXT,
            attachments                     TEXT NOT NULL DEFAULT '[]',
            reply_to_id                     TEXT REFERENCES messages(id),
            is_edited                       INTEGER NOT NULL DEFAULT 0,
            edited_at                       TEXT,
            is_deleted                      INTEGER NOT NULL DEFAULT 0,
            deleted_at                      TEXT,
            deleted_by                      TEXT,
            pinned_at                       TEXT,
            pinned_by                       TEXT,
            forwarded_from_message_id       TEXT,
            forwarded_from_conversation_id  TEXT,
            created_at                      TEXT NOT NULL,
            updated_at                      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS settings (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
