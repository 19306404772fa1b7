//! End-to-end scenarios over an in-memory database: DM dedup, permission
//! gates, rate limiting, roster lifecycle, unread counters.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use rusqlite::params;
use uuid::Uuid;

use spilka_core::{Directory, Ledger, MessagingError, RateLimiter};
use spilka_db::Database;
use spilka_gateway::dispatcher::Dispatcher;
use spilka_types::models::{Attachment, MessageKind, ParticipantRole};
use spilka_types::roles::{MembershipRole, StaffRole};

struct Fixture {
    db: Arc<Database>,
    directory: Directory,
    ledger: Ledger,
}

fn fixture() -> Fixture {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let dispatcher = Dispatcher::new();
    let directory = Directory::new(db.clone(), dispatcher.clone());
    let ledger = Ledger::new(db.clone(), dispatcher, Arc::new(RateLimiter::new()));
    Fixture {
        db,
        directory,
        ledger,
    }
}

fn seed_user(
    db: &Database,
    first: &str,
    last: &str,
    role: MembershipRole,
    staff: StaffRole,
    referred_by: Option<Uuid>,
) -> Uuid {
    let id = Uuid::new_v4();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO users (id, first_name, last_name, membership_role, staff_role, referred_by_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.to_string(),
                first,
                last,
                role.as_str(),
                staff.as_str(),
                referred_by.map(|u| u.to_string()),
                Utc::now(),
            ],
        )?;
        Ok(())
    })
    .unwrap();
    id
}

fn seed_leader(db: &Database, first: &str) -> Uuid {
    seed_user(db, first, "Лідер", MembershipRole::NetworkLeader, StaffRole::None, None)
}

fn set_setting(db: &Database, key: &str, value: &str) {
    db.upsert_setting(key, value, Utc::now()).unwrap();
}

fn count(db: &Database, sql: &str, id: Uuid) -> i64 {
    db.with_conn(|conn| {
        let n: i64 = conn.query_row(sql, params![id.to_string()], |row| row.get(0))?;
        Ok(n)
    })
    .unwrap()
}

fn backdate_message(db: &Database, message_id: Uuid, minutes: i64) {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE messages SET created_at = ?1 WHERE id = ?2",
            params![Utc::now() - Duration::minutes(minutes), message_id.to_string()],
        )?;
        Ok(())
    })
    .unwrap();
}

// -- DM creation --

#[tokio::test]
async fn direct_conversation_creation_is_idempotent() {
    let f = fixture();
    let a = seed_leader(&f.db, "Андрій");
    let b = seed_leader(&f.db, "Богдан");

    let (first, created) = f.directory.ensure_direct(a, b).await.unwrap();
    assert!(created);

    let (again, created_again) = f.directory.ensure_direct(a, b).await.unwrap();
    assert!(!created_again);
    assert_eq!(again.id, first.id);

    // reversed direction finds the same conversation
    let (reversed, created_reversed) = f.directory.ensure_direct(b, a).await.unwrap();
    assert!(!created_reversed);
    assert_eq!(reversed.id, first.id);

    assert_eq!(
        count(
            &f.db,
            "SELECT COUNT(*) FROM conversation_participants WHERE conversation_id = ?1",
            first.id,
        ),
        2
    );
    let conversations: i64 = f
        .db
        .with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?;
            Ok(n)
        })
        .unwrap();
    assert_eq!(conversations, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_contact_yields_one_conversation() {
    let f = fixture();
    let a = seed_leader(&f.db, "Андрій");
    let b = seed_leader(&f.db, "Богдан");

    let mut handles = Vec::new();
    for i in 0..8 {
        let directory = f.directory.clone();
        let (x, y) = if i % 2 == 0 { (a, b) } else { (b, a) };
        handles.push(tokio::spawn(async move {
            directory.ensure_direct(x, y).await.unwrap().0.id
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap());
    }

    assert_eq!(ids.len(), 1);
    let conversation_id = *ids.iter().next().unwrap();
    assert_eq!(
        count(
            &f.db,
            "SELECT COUNT(*) FROM conversation_participants WHERE conversation_id = ?1",
            conversation_id,
        ),
        2
    );
}

#[tokio::test]
async fn self_conversation_is_rejected() {
    let f = fixture();
    let a = seed_leader(&f.db, "Андрій");
    assert!(matches!(
        f.directory.ensure_direct(a, a).await,
        Err(MessagingError::Validation(_))
    ));
}

#[tokio::test]
async fn unrelated_supporter_cannot_start_a_dm() {
    let f = fixture();
    let supporter = seed_user(
        &f.db,
        "Петро",
        "Прихильник",
        MembershipRole::Supporter,
        StaffRole::None,
        None,
    );
    let stranger = seed_user(
        &f.db,
        "Чужа",
        "Людина",
        MembershipRole::Member,
        StaffRole::None,
        None,
    );

    assert!(matches!(
        f.directory.ensure_direct(supporter, stranger).await,
        Err(MessagingError::Forbidden(_))
    ));
}

#[tokio::test]
async fn staff_admin_reaches_anyone_regardless_of_role() {
    let f = fixture();
    // supporter membership is outside dm_initiator_roles; staff rank alone
    // must carry the request
    let moderator = seed_user(
        &f.db,
        "Олена",
        "Модератор",
        MembershipRole::Supporter,
        StaffRole::Admin,
        None,
    );
    let stranger = seed_user(
        &f.db,
        "Чужа",
        "Людина",
        MembershipRole::Supporter,
        StaffRole::None,
        None,
    );

    let (_, created) = f.directory.ensure_direct(moderator, stranger).await.unwrap();
    assert!(created);
}

#[tokio::test]
async fn disabled_messaging_blocks_new_dms() {
    let f = fixture();
    let a = seed_leader(&f.db, "Андрій");
    let b = seed_leader(&f.db, "Богдан");
    set_setting(&f.db, "messaging_dm_enabled", "false");

    assert!(matches!(
        f.directory.ensure_direct(a, b).await,
        Err(MessagingError::Forbidden(_))
    ));
}

// -- Sending, editing, deleting --

#[tokio::test]
async fn send_updates_preview_and_unread_counters() {
    let f = fixture();
    let a = seed_leader(&f.db, "Андрій");
    let b = seed_leader(&f.db, "Богдан");
    let (conversation, _) = f.directory.ensure_direct(a, b).await.unwrap();

    let message = f
        .ledger
        .send_message(conversation.id, a, Some("Привіт!".to_string()), vec![], None)
        .await
        .unwrap();
    assert_eq!(message.kind, MessageKind::Text);

    let refreshed = f.db.get_conversation(conversation.id).unwrap().unwrap();
    assert_eq!(refreshed.last_message_preview.as_deref(), Some("Привіт!"));
    assert_eq!(refreshed.last_message_sender_id, Some(a));
    assert!(refreshed.last_message_at.is_some());

    assert_eq!(f.db.get_participant(conversation.id, b).unwrap().unwrap().unread_count, 1);
    assert_eq!(f.db.get_participant(conversation.id, a).unwrap().unwrap().unread_count, 0);

    f.ledger.mark_read(conversation.id, b).await.unwrap();
    assert_eq!(f.db.get_participant(conversation.id, b).unwrap().unwrap().unread_count, 0);
}

#[tokio::test]
async fn empty_messages_are_rejected() {
    let f = fixture();
    let a = seed_leader(&f.db, "Андрій");
    let b = seed_leader(&f.db, "Богдан");
    let (conversation, _) = f.directory.ensure_direct(a, b).await.unwrap();

    assert!(matches!(
        f.ledger
            .send_message(conversation.id, a, Some("   ".to_string()), vec![], None)
            .await,
        Err(MessagingError::Validation(_))
    ));
}

#[tokio::test]
async fn non_participant_gets_not_found_not_forbidden() {
    let f = fixture();
    let a = seed_leader(&f.db, "Андрій");
    let b = seed_leader(&f.db, "Богдан");
    let outsider = seed_leader(&f.db, "Сторонній");
    let (conversation, _) = f.directory.ensure_direct(a, b).await.unwrap();

    assert!(matches!(
        f.ledger
            .send_message(conversation.id, outsider, Some("?".to_string()), vec![], None)
            .await,
        Err(MessagingError::NotFound(_))
    ));
    assert!(matches!(
        f.directory.list_participants(conversation.id, outsider),
        Err(MessagingError::NotFound(_))
    ));
}

#[tokio::test]
async fn edit_window_is_enforced() {
    let f = fixture();
    let a = seed_leader(&f.db, "Андрій");
    let b = seed_leader(&f.db, "Богдан");
    let (conversation, _) = f.directory.ensure_direct(a, b).await.unwrap();

    let message = f
        .ledger
        .send_message(conversation.id, a, Some("чорновик".to_string()), vec![], None)
        .await
        .unwrap();

    // inside the window (14 of 15 minutes)
    backdate_message(&f.db, message.id, 14);
    let edited = f
        .ledger
        .edit_message(message.id, a, "виправлено".to_string())
        .await
        .unwrap();
    assert!(edited.is_edited);
    assert_eq!(edited.content.as_deref(), Some("виправлено"));

    // outside the window
    backdate_message(&f.db, message.id, 16);
    let err = f
        .ledger
        .edit_message(message.id, a, "запізно".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, MessagingError::Forbidden(reason) if reason.contains("window")));

    // never editable by anyone else, even inside the window
    backdate_message(&f.db, message.id, 1);
    assert!(matches!(
        f.ledger.edit_message(message.id, b, "чуже".to_string()).await,
        Err(MessagingError::Forbidden(_))
    ));
}

#[tokio::test]
async fn soft_delete_clears_payload_and_is_not_repeatable() {
    let f = fixture();
    let a = seed_leader(&f.db, "Андрій");
    let b = seed_leader(&f.db, "Богдан");
    let (conversation, _) = f.directory.ensure_direct(a, b).await.unwrap();

    let attachment = Attachment {
        url: "https://files.example/звіт".to_string(),
        name: "звіт.pdf".to_string(),
        mime_type: "application/pdf".to_string(),
        size_bytes: 1024,
    };
    let message = f
        .ledger
        .send_message(
            conversation.id,
            a,
            Some("звіт у додатку".to_string()),
            vec![attachment],
            None,
        )
        .await
        .unwrap();

    f.ledger.delete_message(message.id, a).await.unwrap();

    let deleted = f.db.get_message(message.id).unwrap().unwrap();
    assert!(deleted.is_deleted);
    assert!(deleted.content.is_none());
    assert!(deleted.attachments.is_empty());
    assert_eq!(deleted.deleted_by, Some(a));
    // id and creation time survive for thread integrity
    assert_eq!(deleted.id, message.id);
    assert_eq!(deleted.created_at, message.created_at);

    assert!(matches!(
        f.ledger.delete_message(message.id, a).await,
        Err(MessagingError::Conflict(_))
    ));
    // a deleted message can no longer be edited
    assert!(matches!(
        f.ledger.edit_message(message.id, a, "нове".to_string()).await,
        Err(MessagingError::Validation(_))
    ));
}

#[tokio::test]
async fn dm_owner_cannot_moderate_the_other_side() {
    let f = fixture();
    let a = seed_leader(&f.db, "Андрій");
    let b = seed_leader(&f.db, "Богдан");
    let (conversation, _) = f.directory.ensure_direct(a, b).await.unwrap();

    let message = f
        .ledger
        .send_message(conversation.id, b, Some("моє".to_string()), vec![], None)
        .await
        .unwrap();

    // `a` holds the owner participant row of the DM but that grants no
    // moderation rights outside groups
    assert!(matches!(
        f.ledger.delete_message(message.id, a).await,
        Err(MessagingError::Forbidden(_))
    ));
}

#[tokio::test]
async fn rate_limit_rejects_the_sixth_send() {
    let f = fixture();
    let a = seed_leader(&f.db, "Андрій");
    let b = seed_leader(&f.db, "Богдан");
    let (conversation, _) = f.directory.ensure_direct(a, b).await.unwrap();
    set_setting(&f.db, "messaging_rate_limit_messages_per_minute", "5");

    for i in 0..5 {
        f.ledger
            .send_message(conversation.id, a, Some(format!("№{i}")), vec![], None)
            .await
            .unwrap();
    }

    let err = f
        .ledger
        .send_message(conversation.id, a, Some("№6".to_string()), vec![], None)
        .await
        .unwrap_err();
    assert!(matches!(err, MessagingError::RateLimited { .. }));

    // the other side is unaffected
    f.ledger
        .send_message(conversation.id, b, Some("а я можу".to_string()), vec![], None)
        .await
        .unwrap();
}

#[tokio::test]
async fn attachment_rules_fail_before_anything_is_written() {
    let f = fixture();
    let a = seed_leader(&f.db, "Андрій");
    let b = seed_leader(&f.db, "Богдан");
    let (conversation, _) = f.directory.ensure_direct(a, b).await.unwrap();

    let oversized = Attachment {
        url: "https://files.example/video".to_string(),
        name: "відео.mp4".to_string(),
        mime_type: "image/png".to_string(),
        size_bytes: 26 * 1024 * 1024,
    };
    assert!(matches!(
        f.ledger
            .send_message(conversation.id, a, None, vec![oversized], None)
            .await,
        Err(MessagingError::Validation(_))
    ));

    set_setting(&f.db, "messaging_attachments_enabled", "false");
    let small = Attachment {
        url: "https://files.example/фото".to_string(),
        name: "фото.png".to_string(),
        mime_type: "image/png".to_string(),
        size_bytes: 1024,
    };
    assert!(matches!(
        f.ledger
            .send_message(conversation.id, a, None, vec![small], None)
            .await,
        Err(MessagingError::Forbidden(_))
    ));

    // nothing was persisted by the rejected sends
    assert_eq!(
        count(
            &f.db,
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            conversation.id,
        ),
        0
    );
}

// -- Groups --

#[tokio::test]
async fn group_cap_rejects_the_batch_without_partial_inserts() {
    let f = fixture();
    let leader = seed_leader(&f.db, "Лариса");
    set_setting(&f.db, "messaging_max_group_participants", "3");

    let group = f
        .directory
        .create_group(leader, Some("Ланка".to_string()), None)
        .await
        .unwrap();

    let m = seed_user(&f.db, "Марія", "Коваль", MembershipRole::Member, StaffRole::None, None);
    let n = seed_user(&f.db, "Назар", "Іщук", MembershipRole::Member, StaffRole::None, None);
    assert_eq!(
        f.directory.add_participants(group.id, leader, vec![m, n]).await.unwrap(),
        2
    );

    let o = seed_user(&f.db, "Оксана", "Лисенко", MembershipRole::Member, StaffRole::None, None);
    let p = seed_user(&f.db, "Павло", "Гринь", MembershipRole::Member, StaffRole::None, None);
    assert!(matches!(
        f.directory.add_participants(group.id, leader, vec![o, p]).await,
        Err(MessagingError::Validation(_))
    ));

    assert_eq!(
        count(
            &f.db,
            "SELECT COUNT(*) FROM conversation_participants WHERE conversation_id = ?1 AND is_active = 1",
            group.id,
        ),
        3
    );
}

#[tokio::test]
async fn members_cannot_manage_the_roster() {
    let f = fixture();
    let leader = seed_leader(&f.db, "Лариса");
    let m = seed_user(&f.db, "Марія", "Коваль", MembershipRole::Member, StaffRole::None, None);
    let n = seed_user(&f.db, "Назар", "Іщук", MembershipRole::Member, StaffRole::None, None);
    let group = f.directory.create_group(leader, None, None).await.unwrap();
    f.directory.add_participants(group.id, leader, vec![m, n]).await.unwrap();

    let extra = seed_user(&f.db, "Олег", "Ткач", MembershipRole::Member, StaffRole::None, None);
    assert!(matches!(
        f.directory.add_participants(group.id, m, vec![extra]).await,
        Err(MessagingError::Forbidden(_))
    ));
    assert!(matches!(
        f.directory.remove_participant(group.id, m, n).await,
        Err(MessagingError::Forbidden(_))
    ));
    // leaving is always allowed
    f.directory.remove_participant(group.id, m, m).await.unwrap();
}

#[tokio::test]
async fn rejoining_reactivates_the_previous_row() {
    let f = fixture();
    let leader = seed_leader(&f.db, "Лариса");
    let m = seed_user(&f.db, "Марія", "Коваль", MembershipRole::Member, StaffRole::None, None);
    let group = f.directory.create_group(leader, None, None).await.unwrap();

    f.directory.add_participants(group.id, leader, vec![m]).await.unwrap();
    f.directory.remove_participant(group.id, leader, m).await.unwrap();
    assert_eq!(
        f.directory.add_participants(group.id, leader, vec![m]).await.unwrap(),
        1
    );

    // one row, not two
    assert_eq!(
        count(
            &f.db,
            "SELECT COUNT(*) FROM conversation_participants WHERE conversation_id = ?1",
            group.id,
        ),
        2
    );
    let row = f.db.get_participant(group.id, m).unwrap().unwrap();
    assert!(row.is_active);
    assert!(row.left_at.is_none());
    assert!(row.removed_by.is_none());
}

#[tokio::test]
async fn emptied_group_is_deactivated() {
    let f = fixture();
    let leader = seed_leader(&f.db, "Лариса");
    let group = f.directory.create_group(leader, None, None).await.unwrap();

    f.directory.remove_participant(group.id, leader, leader).await.unwrap();

    let refreshed = f.db.get_conversation(group.id).unwrap().unwrap();
    assert!(!refreshed.is_active);
    assert_eq!(refreshed.participant_count, 0);
}

#[tokio::test]
async fn group_lifecycle_end_to_end() {
    let f = fixture();
    let leader = seed_leader(&f.db, "Лариса");
    let m = seed_user(&f.db, "Марія", "Коваль", MembershipRole::Member, StaffRole::None, None);
    let n = seed_user(&f.db, "Назар", "Іщук", MembershipRole::Member, StaffRole::None, None);

    let group = f
        .directory
        .create_group(leader, Some("Осередок".to_string()), None)
        .await
        .unwrap();
    assert_eq!(f.directory.add_participants(group.id, leader, vec![m, n]).await.unwrap(), 2);

    // one pluralized system notice naming both joiners
    let history = f.ledger.list_messages(group.id, leader, 50, None).await.unwrap();
    let notice = history
        .iter()
        .find(|msg| msg.kind == MessageKind::System)
        .expect("join notice missing");
    assert!(notice.sender_id.is_none());
    let text = notice.content.as_deref().unwrap();
    assert!(text.contains("Марія Коваль"));
    assert!(text.contains("Назар Іщук"));
    assert!(text.contains("приєдналися до групи"));

    // M sends; the others' unread counters move, M's does not
    let sent = f
        .ledger
        .send_message(group.id, m, Some("Слава Україні!".to_string()), vec![], None)
        .await
        .unwrap();
    assert_eq!(f.db.get_participant(group.id, leader).unwrap().unwrap().unread_count, 1);
    assert_eq!(f.db.get_participant(group.id, n).unwrap().unwrap().unread_count, 1);
    assert_eq!(f.db.get_participant(group.id, m).unwrap().unwrap().unread_count, 0);

    // editable by the sender, by no one else
    f.ledger.edit_message(sent.id, m, "Героям слава!".to_string()).await.unwrap();
    assert!(matches!(
        f.ledger.edit_message(sent.id, leader, "ні".to_string()).await,
        Err(MessagingError::Forbidden(_))
    ));

    // the roster shows public profile fields only
    let roster = f.directory.list_participants(group.id, m).unwrap();
    assert_eq!(roster.len(), 3);
    let owner_row = roster.iter().find(|p| p.user_id == leader).unwrap();
    assert_eq!(owner_row.role, ParticipantRole::Owner);

    // the owner removes N; N loses access entirely
    f.directory.remove_participant(group.id, leader, n).await.unwrap();
    let refreshed = f.db.get_conversation(group.id).unwrap().unwrap();
    assert_eq!(refreshed.participant_count, 2);
    assert!(matches!(
        f.ledger
            .send_message(group.id, n, Some("я ще тут?".to_string()), vec![], None)
            .await,
        Err(MessagingError::NotFound(_))
    ));
}
