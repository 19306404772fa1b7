//! Message lifecycle: send, edit-within-window, soft delete, system
//! messages, read cursors.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use spilka_db::{Database, queries};
use spilka_gateway::dispatcher::Dispatcher;
use spilka_types::events::SyncEvent;
use spilka_types::models::{
    Attachment, ConversationKind, Message, MessageKind, Participant, ParticipantRole,
};

use crate::error::{MessagingError, Result};
use crate::permissions;
use crate::rate_limit::RateLimiter;
use crate::settings;

const PREVIEW_LEN: usize = 100;

#[derive(Clone)]
pub struct Ledger {
    db: Arc<Database>,
    events: Dispatcher,
    rate_limiter: Arc<RateLimiter>,
}

impl Ledger {
    pub fn new(db: Arc<Database>, events: Dispatcher, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            db,
            events,
            rate_limiter,
        }
    }

    /// Append a message. The insert, the conversation preview update, and
    /// the unread bumps for every other active participant commit together;
    /// the change event is published only after the commit.
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: Option<String>,
        attachments: Vec<Attachment>,
        reply_to_id: Option<Uuid>,
    ) -> Result<Message> {
        let config = settings::resolve(&self.db)?;
        if !config.enabled {
            return Err(MessagingError::Forbidden("messaging is disabled"));
        }

        let conversation = self
            .db
            .get_conversation(conversation_id)?
            .ok_or(MessagingError::NotFound("conversation"))?;
        let participant = require_active_participant(&self.db, conversation_id, sender_id)?;

        if !conversation.is_active {
            return Err(MessagingError::Validation(
                "conversation is no longer active".to_string(),
            ));
        }
        if !conversation.allow_replies && participant.role == ParticipantRole::Member {
            return Err(MessagingError::Forbidden(
                "replies are disabled in this conversation",
            ));
        }

        let content = content.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
        if content.is_none() && attachments.is_empty() {
            return Err(MessagingError::Validation(
                "message has no content".to_string(),
            ));
        }

        self.rate_limiter.check(sender_id, &config)?;

        // Attachment violations fail before anything is written.
        if !attachments.is_empty() {
            if !permissions::can_send_attachments(&config) {
                return Err(MessagingError::Forbidden("attachments are disabled"));
            }
            for attachment in &attachments {
                permissions::validate_attachment(attachment, &config)?;
            }
        }

        if let Some(reply_to) = reply_to_id {
            let replied = self
                .db
                .get_message(reply_to)?
                .ok_or(MessagingError::NotFound("message"))?;
            if replied.conversation_id != conversation_id {
                return Err(MessagingError::Validation(
                    "reply target belongs to a different conversation".to_string(),
                ));
            }
        }

        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: Some(sender_id),
            kind: kind_for(&attachments),
            content,
            attachments,
            reply_to_id,
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
            pinned_at: None,
            pinned_by: None,
            forwarded_from_message_id: None,
            forwarded_from_conversation_id: None,
            created_at: now,
            updated_at: now,
        };
        let preview = preview_of(&message);

        let db = self.db.clone();
        let persisted = message.clone();
        tokio::task::spawn_blocking(move || {
            db.with_tx(|tx| {
                queries::messages::insert_message(tx, &persisted)?;
                queries::conversations::touch_last_message(
                    tx,
                    conversation_id,
                    now,
                    &preview,
                    sender_id,
                )?;
                queries::participants::bump_unread(tx, conversation_id, sender_id)?;
                Ok(())
            })
        })
        .await
        .map_err(|e| anyhow::anyhow!("message write task failed: {e}"))??;

        debug!(message_id = %message.id, %conversation_id, "message stored");
        self.events.publish(SyncEvent::MessageCreate {
            message: message.clone(),
        });

        Ok(message)
    }

    pub async fn edit_message(
        &self,
        message_id: Uuid,
        caller_id: Uuid,
        new_content: String,
    ) -> Result<Message> {
        let config = settings::resolve(&self.db)?;
        let mut message = self
            .db
            .get_message(message_id)?
            .ok_or(MessagingError::NotFound("message"))?;
        require_active_participant(&self.db, message.conversation_id, caller_id)?;

        if message.kind == MessageKind::System {
            return Err(MessagingError::Forbidden("system messages cannot be edited"));
        }
        if message.is_deleted {
            return Err(MessagingError::Validation(
                "message has been deleted".to_string(),
            ));
        }

        let new_content = new_content.trim().to_string();
        if new_content.is_empty() {
            return Err(MessagingError::Validation(
                "message content cannot be empty".to_string(),
            ));
        }

        if message.sender_id != Some(caller_id) {
            return Err(MessagingError::Forbidden("only the sender can edit a message"));
        }
        if !permissions::can_edit_message(caller_id, &message, &config) {
            return Err(MessagingError::Forbidden("the edit window has expired"));
        }

        let now = Utc::now();
        self.db
            .with_conn(|conn| queries::messages::apply_edit(conn, message_id, &new_content, now))?;

        message.content = Some(new_content);
        message.is_edited = true;
        message.edited_at = Some(now);
        message.updated_at = now;

        self.events.publish(SyncEvent::MessageUpdate {
            message: message.clone(),
        });

        Ok(message)
    }

    /// Soft delete: the row keeps its id and timestamps for thread
    /// integrity, only the payload is cleared. Delivered to clients as a
    /// removal, never as an edit.
    pub async fn delete_message(&self, message_id: Uuid, caller_id: Uuid) -> Result<()> {
        let message = self
            .db
            .get_message(message_id)?
            .ok_or(MessagingError::NotFound("message"))?;
        let participant =
            require_active_participant(&self.db, message.conversation_id, caller_id)?;

        if message.kind == MessageKind::System {
            return Err(MessagingError::Forbidden(
                "system messages cannot be deleted",
            ));
        }
        if message.is_deleted {
            return Err(MessagingError::Conflict("message is already deleted"));
        }

        let conversation = self
            .db
            .get_conversation(message.conversation_id)?
            .ok_or(MessagingError::NotFound("conversation"))?;
        // Owner/admin moderation applies to groups only; in a DM the
        // initiator holds the owner row but gets no power over the other
        // side's messages.
        let moderation_role = if conversation.kind == ConversationKind::Group {
            participant.role
        } else {
            ParticipantRole::Member
        };
        let caller = self
            .db
            .get_user(caller_id)?
            .ok_or(MessagingError::NotFound("user"))?;

        let allowed = caller.staff_role.is_staff_admin()
            || permissions::can_delete_message(caller_id, moderation_role, &message);
        if !allowed {
            return Err(MessagingError::Forbidden("you cannot delete this message"));
        }

        let now = Utc::now();
        self.db
            .with_conn(|conn| queries::messages::apply_delete(conn, message_id, now, caller_id))?;

        self.events.publish(SyncEvent::MessageDelete {
            conversation_id: message.conversation_id,
            message_id,
            deleted_by: caller_id,
        });

        Ok(())
    }

    /// Stamp the read cursor and zero the unread counter.
    pub async fn mark_read(&self, conversation_id: Uuid, caller_id: Uuid) -> Result<()> {
        require_active_participant(&self.db, conversation_id, caller_id)?;
        self.db.mark_read(conversation_id, caller_id, Utc::now())?;
        Ok(())
    }

    /// Page through history, newest first.
    pub async fn list_messages(
        &self,
        conversation_id: Uuid,
        caller_id: Uuid,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        require_active_participant(&self.db, conversation_id, caller_id)?;

        let db = self.db.clone();
        let limit = limit.min(200);
        let messages = tokio::task::spawn_blocking(move || {
            db.list_messages(conversation_id, limit, before)
        })
        .await
        .map_err(|e| anyhow::anyhow!("message read task failed: {e}"))??;

        Ok(messages)
    }

}

/// Membership gate shared by every per-conversation operation. Outsiders get
/// NotFound so conversation existence is never leaked.
pub(crate) fn require_active_participant(
    db: &Database,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<Participant> {
    db.get_participant(conversation_id, user_id)?
        .filter(|p| p.is_active)
        .ok_or(MessagingError::NotFound("conversation"))
}

/// Roster-event notices are stored as sender-less system messages.
pub(crate) fn system_message(
    conversation_id: Uuid,
    content: String,
    now: DateTime<Utc>,
) -> Message {
    Message {
        id: Uuid::new_v4(),
        conversation_id,
        sender_id: None,
        kind: MessageKind::System,
        content: Some(content),
        attachments: vec![],
        reply_to_id: None,
        is_edited: false,
        edited_at: None,
        is_deleted: false,
        deleted_at: None,
        deleted_by: None,
        pinned_at: None,
        pinned_by: None,
        forwarded_from_message_id: None,
        forwarded_from_conversation_id: None,
        created_at: now,
        updated_at: now,
    }
}

fn kind_for(attachments: &[Attachment]) -> MessageKind {
    match attachments.first() {
        None => MessageKind::Text,
        Some(first) if first.mime_type.starts_with("image/") => MessageKind::Image,
        Some(_) => MessageKind::File,
    }
}

fn preview_of(message: &Message) -> String {
    match &message.content {
        Some(content) => content.chars().take(PREVIEW_LEN).collect(),
        None => message
            .attachments
            .first()
            .map(|a| a.name.clone())
            .unwrap_or_default(),
    }
}
