//! Conversation and participant lifecycle: DM lookup-or-create, group
//! creation, roster management, roster queries.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use spilka_db::{Database, queries};
use spilka_gateway::dispatcher::Dispatcher;
use spilka_types::api::ParticipantInfo;
use spilka_types::events::SyncEvent;
use spilka_types::models::{
    Conversation, ConversationKind, Participant, ParticipantRole, UserProfile,
};

use crate::error::{MessagingError, Result};
use crate::ledger;
use crate::permissions::{self, RelationshipFacts};
use crate::settings;

const MAX_GROUP_NAME_LEN: usize = 128;

/// Serializes the DM check-then-create sequence per unordered user pair.
/// Without it, two concurrent first-contact requests between the same two
/// users could both pass the lookup and insert duplicates.
struct PairLocks {
    inner: std::sync::Mutex<HashMap<(Uuid, Uuid), Arc<tokio::sync::Mutex<()>>>>,
}

impl PairLocks {
    fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, a: Uuid, b: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let key = if a < b { (a, b) } else { (b, a) };
        let mut map = self.inner.lock().expect("pair lock map poisoned");
        map.entry(key)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[derive(Clone)]
pub struct Directory {
    db: Arc<Database>,
    events: Dispatcher,
    dm_locks: Arc<PairLocks>,
}

impl Directory {
    pub fn new(db: Arc<Database>, events: Dispatcher) -> Self {
        Self {
            db,
            events,
            dm_locks: Arc::new(PairLocks::new()),
        }
    }

    /// Idempotent DM lookup-or-create. Returns the conversation and whether
    /// it was created by this call.
    ///
    /// Permission checks run only on the create path: an existing
    /// conversation stays reachable even if the rules have tightened since.
    pub async fn ensure_direct(
        &self,
        user_id: Uuid,
        other_user_id: Uuid,
    ) -> Result<(Conversation, bool)> {
        if user_id == other_user_id {
            return Err(MessagingError::Validation(
                "cannot start a conversation with yourself".to_string(),
            ));
        }

        let lock = self.dm_locks.lock_for(user_id, other_user_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.db.find_direct_for_pair(user_id, other_user_id)? {
            return Ok((existing, false));
        }

        let config = settings::resolve(&self.db)?;
        let sender = self
            .db
            .get_user(user_id)?
            .ok_or(MessagingError::NotFound("user"))?;
        let recipient = self
            .db
            .get_user(other_user_id)?
            .ok_or(MessagingError::NotFound("user"))?;

        if !permissions::can_initiate_dms(sender.membership_role, sender.staff_role, &config) {
            return Err(MessagingError::Forbidden(
                "your role cannot start direct conversations",
            ));
        }
        let facts = self.relationship_facts(&sender, &recipient)?;
        if !permissions::can_message_user(&sender, &recipient, &facts, &config) {
            return Err(MessagingError::Forbidden("you cannot message this user"));
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            kind: ConversationKind::Direct,
            name: None,
            description: None,
            avatar_url: None,
            created_by: user_id,
            is_active: true,
            allow_replies: true,
            participant_count: 2,
            last_message_at: None,
            last_message_preview: None,
            last_message_sender_id: None,
            pinned_message_ids: vec![],
            created_at: now,
            updated_at: now,
        };
        let key = queries::conversations::direct_key(user_id, other_user_id);

        // Conversation plus both participant rows are one atomic unit; a
        // failed sub-step must not leave an orphan conversation behind.
        let outcome = self.db.with_tx(|tx| {
            queries::conversations::insert_conversation(tx, &conversation, Some(&key))?;
            queries::participants::insert_participant(
                tx,
                &new_participant(conversation.id, user_id, ParticipantRole::Owner, now),
            )?;
            queries::participants::insert_participant(
                tx,
                &new_participant(conversation.id, other_user_id, ParticipantRole::Member, now),
            )?;
            Ok(())
        });

        if let Err(err) = outcome {
            // The unique direct_key index is the backstop for races that slip
            // past the pair lock (e.g. multiple server instances): the loser
            // re-reads and returns the winner's conversation.
            if spilka_db::is_unique_violation(&err) {
                warn!(%user_id, %other_user_id, "lost direct-conversation race, returning winner");
                let existing = self
                    .db
                    .find_direct_for_pair(user_id, other_user_id)?
                    .ok_or(MessagingError::Conflict(
                        "concurrent direct conversation creation",
                    ))?;
                return Ok((existing, false));
            }
            return Err(err.into());
        }

        info!(conversation_id = %conversation.id, "direct conversation created");
        for uid in [user_id, other_user_id] {
            self.events
                .send_to_user(
                    uid,
                    SyncEvent::ConversationCreate {
                        conversation: conversation.clone(),
                    },
                )
                .await;
        }

        Ok((conversation, true))
    }

    pub async fn create_group(
        &self,
        creator_id: Uuid,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<Conversation> {
        let config = settings::resolve(&self.db)?;
        let creator = self
            .db
            .get_user(creator_id)?
            .ok_or(MessagingError::NotFound("user"))?;

        if !permissions::can_create_group_chats(creator.membership_role, creator.staff_role, &config)
        {
            return Err(MessagingError::Forbidden(
                "your role cannot create group conversations",
            ));
        }

        let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        if let Some(name) = &name {
            if name.chars().count() > MAX_GROUP_NAME_LEN {
                return Err(MessagingError::Validation(format!(
                    "group name is limited to {MAX_GROUP_NAME_LEN} characters"
                )));
            }
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            kind: ConversationKind::Group,
            name,
            description,
            avatar_url: None,
            created_by: creator_id,
            is_active: true,
            allow_replies: true,
            participant_count: 1,
            last_message_at: None,
            last_message_preview: None,
            last_message_sender_id: None,
            pinned_message_ids: vec![],
            created_at: now,
            updated_at: now,
        };

        self.db.with_tx(|tx| {
            queries::conversations::insert_conversation(tx, &conversation, None)?;
            queries::participants::insert_participant(
                tx,
                &new_participant(conversation.id, creator_id, ParticipantRole::Owner, now),
            )?;
            Ok(())
        })?;

        info!(conversation_id = %conversation.id, "group conversation created");
        self.events
            .send_to_user(
                creator_id,
                SyncEvent::ConversationCreate {
                    conversation: conversation.clone(),
                },
            )
            .await;

        Ok(conversation)
    }

    /// Add users to a group, reactivating previously-left rows. The roster
    /// change and the announcing system message commit together.
    pub async fn add_participants(
        &self,
        conversation_id: Uuid,
        caller_id: Uuid,
        target_user_ids: Vec<Uuid>,
    ) -> Result<u32> {
        let config = settings::resolve(&self.db)?;
        let conversation = self
            .db
            .get_conversation(conversation_id)?
            .ok_or(MessagingError::NotFound("conversation"))?;
        let caller = self.require_active_participant(conversation_id, caller_id)?;

        if conversation.kind != ConversationKind::Group {
            return Err(MessagingError::Validation(
                "participants can only be added to group conversations".to_string(),
            ));
        }
        if !conversation.is_active {
            return Err(MessagingError::Validation(
                "conversation is no longer active".to_string(),
            ));
        }
        if !permissions::can_add_to_group(caller.role, &config) {
            return Err(MessagingError::Forbidden(
                "only group owners and admins can add participants",
            ));
        }

        let mut pending = Vec::new();
        for id in target_user_ids {
            if id == caller_id || pending.contains(&id) {
                continue;
            }
            match self.db.get_participant(conversation_id, id)? {
                Some(p) if p.is_active => continue,
                _ => pending.push(id),
            }
        }
        if pending.is_empty() {
            return Ok(0);
        }

        // Cap check happens before any insert so a rejected batch applies
        // nothing at all.
        let new_total = conversation.participant_count + pending.len() as u32;
        if new_total > config.max_group_participants {
            return Err(MessagingError::Validation(format!(
                "group is limited to {} participants",
                config.max_group_participants
            )));
        }

        let mut joined_names = Vec::new();
        for id in &pending {
            let user = self
                .db
                .get_user(*id)?
                .ok_or(MessagingError::NotFound("user"))?;
            joined_names.push(user.display_name());
        }

        let now = Utc::now();
        let system = ledger::system_message(conversation_id, join_notice(&joined_names), now);

        self.db.with_tx(|tx| {
            for id in &pending {
                match queries::participants::get_participant(tx, conversation_id, *id)? {
                    Some(prior) => {
                        queries::participants::reactivate_participant(tx, prior.id, now)?
                    }
                    None => queries::participants::insert_participant(
                        tx,
                        &new_participant(conversation_id, *id, ParticipantRole::Member, now),
                    )?,
                }
            }
            queries::conversations::adjust_participant_count(
                tx,
                conversation_id,
                pending.len() as i64,
            )?;
            queries::messages::insert_message(tx, &system)?;
            Ok(())
        })?;

        for id in &pending {
            self.events.publish(SyncEvent::ParticipantJoin {
                conversation_id,
                user_id: *id,
            });
            self.events
                .send_to_user(
                    *id,
                    SyncEvent::ConversationCreate {
                        conversation: conversation.clone(),
                    },
                )
                .await;
        }
        self.events.publish(SyncEvent::MessageCreate { message: system });

        Ok(pending.len() as u32)
    }

    /// Leave a group or remove another participant from it.
    pub async fn remove_participant(
        &self,
        conversation_id: Uuid,
        caller_id: Uuid,
        target_user_id: Uuid,
    ) -> Result<()> {
        let conversation = self
            .db
            .get_conversation(conversation_id)?
            .ok_or(MessagingError::NotFound("conversation"))?;
        let caller = self.require_active_participant(conversation_id, caller_id)?;

        if conversation.kind != ConversationKind::Group {
            return Err(MessagingError::Validation(
                "direct conversations have a fixed pair of participants".to_string(),
            ));
        }

        let target = self
            .db
            .get_participant(conversation_id, target_user_id)?
            .filter(|p| p.is_active)
            .ok_or(MessagingError::NotFound("participant"))?;

        let leaving = caller_id == target_user_id;
        if !leaving && !permissions::can_remove_from_group(caller.role, target.role) {
            return Err(MessagingError::Forbidden(
                "you cannot remove this participant",
            ));
        }

        let user = self
            .db
            .get_user(target_user_id)?
            .ok_or(MessagingError::NotFound("user"))?;
        let now = Utc::now();
        let notice = if leaving {
            leave_notice(&user.display_name())
        } else {
            removed_notice(&user.display_name())
        };
        let system = ledger::system_message(conversation_id, notice, now);
        let removed_by = (!leaving).then_some(caller_id);

        let remaining = self.db.with_tx(|tx| {
            queries::participants::mark_left(tx, target.id, now, removed_by)?;
            queries::conversations::adjust_participant_count(tx, conversation_id, -1)?;
            let remaining = queries::conversations::participant_count(tx, conversation_id)?;
            if remaining <= 0 {
                queries::conversations::set_conversation_active(tx, conversation_id, false)?;
            }
            queries::messages::insert_message(tx, &system)?;
            Ok(remaining)
        })?;

        self.events.publish(SyncEvent::ParticipantLeave {
            conversation_id,
            user_id: target_user_id,
            removed_by,
        });
        self.events.publish(SyncEvent::MessageCreate { message: system });

        if remaining <= 0 {
            info!(%conversation_id, "group emptied, conversation deactivated");
        }

        Ok(())
    }

    /// Active roster with public profile fields. Callable by participants
    /// only; outsiders learn nothing, including whether the id exists.
    pub fn list_participants(
        &self,
        conversation_id: Uuid,
        caller_id: Uuid,
    ) -> Result<Vec<ParticipantInfo>> {
        self.require_active_participant(conversation_id, caller_id)?;
        Ok(self.db.roster(conversation_id)?)
    }

    pub fn list_conversations(&self, caller_id: Uuid) -> Result<Vec<Conversation>> {
        Ok(self.db.conversations_for_user(caller_id)?)
    }

    /// Fetch one conversation, participants only.
    pub fn get_conversation(&self, conversation_id: Uuid, caller_id: Uuid) -> Result<Conversation> {
        self.require_active_participant(conversation_id, caller_id)?;
        self.db
            .get_conversation(conversation_id)?
            .ok_or(MessagingError::NotFound("conversation"))
    }

    fn require_active_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Participant> {
        ledger::require_active_participant(&self.db, conversation_id, user_id)
    }

    fn relationship_facts(
        &self,
        sender: &UserProfile,
        recipient: &UserProfile,
    ) -> Result<RelationshipFacts> {
        Ok(RelationshipFacts {
            recipient_in_sender_tree: self.db.is_in_referral_tree(sender.id, recipient.id)?,
            recipient_is_direct_referral: self.db.is_direct_referral(sender.id, recipient.id)?,
            sender_direct_referral_count: self.db.direct_referral_count(sender.id)?,
            share_group: self.db.share_group(sender.id, recipient.id)?,
            sender_leads_recipient_group: self.db.leads_group_of(sender.id, recipient.id)?,
        })
    }
}

pub(crate) fn new_participant(
    conversation_id: Uuid,
    user_id: Uuid,
    role: ParticipantRole,
    now: DateTime<Utc>,
) -> Participant {
    Participant {
        id: Uuid::new_v4(),
        conversation_id,
        user_id,
        role,
        is_muted: false,
        last_read_at: None,
        unread_count: 0,
        is_active: true,
        joined_at: now,
        left_at: None,
        removed_by: None,
    }
}

fn join_notice(names: &[String]) -> String {
    let joined = names.join(", ");
    if names.len() == 1 {
        format!("{joined} приєднався до групи")
    } else {
        format!("{joined} приєдналися до групи")
    }
}

fn leave_notice(name: &str) -> String {
    format!("{name} покинув групу")
}

fn removed_notice(name: &str) -> String {
    format!("{name} видалено з групи")
}
