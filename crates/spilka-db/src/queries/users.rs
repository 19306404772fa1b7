//! Read-only view of the external user directory.

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use spilka_types::models::UserProfile;

use crate::Database;
use crate::models::{USER_COLS, user_from_row};

impl Database {
    pub fn get_user(&self, id: Uuid) -> Result<Option<UserProfile>> {
        self.with_conn(|conn| get_user(conn, id))
    }

    /// Is `user` anywhere in the referral tree rooted at `root`?
    pub fn is_in_referral_tree(&self, root: Uuid, user: Uuid) -> Result<bool> {
        self.with_conn(|conn| is_in_referral_tree(conn, root, user))
    }

    pub fn is_direct_referral(&self, referrer: Uuid, user: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found: bool = conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM users WHERE id = ?2 AND referred_by_id = ?1)",
                params![referrer.to_string(), user.to_string()],
                |row| row.get(0),
            )?;
            Ok(found)
        })
    }

    pub fn direct_referral_count(&self, id: Uuid) -> Result<u32> {
        self.with_conn(|conn| {
            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE referred_by_id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Does `leader` lead the group `user` belongs to?
    pub fn leads_group_of(&self, leader: Uuid, user: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found: bool = conn.query_row(
                "SELECT EXISTS (
                     SELECT 1 FROM users u
                     JOIN org_groups g ON u.group_id = g.id
                     WHERE u.id = ?2 AND g.leader_id = ?1
                 )",
                params![leader.to_string(), user.to_string()],
                |row| row.get(0),
            )?;
            Ok(found)
        })
    }

    pub fn share_group(&self, a: Uuid, b: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found: bool = conn.query_row(
                "SELECT EXISTS (
                     SELECT 1 FROM users a
                     JOIN users b ON a.group_id = b.group_id
                     WHERE a.id = ?1 AND b.id = ?2 AND a.group_id IS NOT NULL
                 )",
                params![a.to_string(), b.to_string()],
                |row| row.get(0),
            )?;
            Ok(found)
        })
    }
}

pub fn get_user(conn: &Connection, id: Uuid) -> Result<Option<UserProfile>> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLS} FROM users WHERE id = ?1"))?;
    let user = stmt
        .query_row(params![id.to_string()], user_from_row)
        .optional()?;
    Ok(user)
}

fn is_in_referral_tree(conn: &Connection, root: Uuid, user: Uuid) -> Result<bool> {
    let found: bool = conn.query_row(
        "WITH RECURSIVE tree(id) AS (
             SELECT id FROM users WHERE referred_by_id = ?1
             UNION
             SELECT u.id FROM users u JOIN tree t ON u.referred_by_id = t.id
         )
         SELECT EXISTS (SELECT 1 FROM tree WHERE id = ?2)",
        params![root.to_string(), user.to_string()],
        |row| row.get(0),
    )?;
    Ok(found)
}
