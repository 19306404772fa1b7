use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Conversation, Message};

/// Events pushed to clients over the realtime gateway.
///
/// Message and roster events are projections of committed state; `Typing` and
/// `PresenceUpdate` are ephemeral broadcasts with no delivery guarantee.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SyncEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid },

    /// A conversation the user participates in was created (targeted delivery)
    ConversationCreate { conversation: Conversation },

    /// A new message was posted
    MessageCreate { message: Message },

    /// An existing message was edited
    MessageUpdate { message: Message },

    /// A message was soft-deleted. Deliberately not a MessageUpdate: clients
    /// must treat removal differently from an edit.
    MessageDelete {
        conversation_id: Uuid,
        message_id: Uuid,
        deleted_by: Uuid,
    },

    /// A user joined or was (re)added to a conversation
    ParticipantJoin { conversation_id: Uuid, user_id: Uuid },

    /// A user left or was removed from a conversation
    ParticipantLeave {
        conversation_id: Uuid,
        user_id: Uuid,
        removed_by: Option<Uuid>,
    },

    /// Ephemeral typing indicator; stale after a few seconds without a stop
    Typing {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },

    /// A user came online, went offline, or changed the viewed conversation
    PresenceUpdate {
        user_id: Uuid,
        online: bool,
        current_conversation_id: Option<Uuid>,
    },
}

impl SyncEvent {
    /// Returns the conversation id if this event is scoped to one.
    /// Unscoped events are delivered to every connected client (presence) or
    /// sent over per-user channels (ready, conversation create).
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate { message } => Some(message.conversation_id),
            Self::MessageUpdate { message } => Some(message.conversation_id),
            Self::MessageDelete { conversation_id, .. } => Some(*conversation_id),
            Self::ParticipantJoin { conversation_id, .. } => Some(*conversation_id),
            Self::ParticipantLeave { conversation_id, .. } => Some(*conversation_id),
            Self::Typing { conversation_id, .. } => Some(*conversation_id),
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Replace the set of conversations this connection receives events for.
    /// The server drops ids the user is not an active participant of.
    Subscribe { conversation_ids: Vec<Uuid> },

    /// Indicate typing in a conversation
    TypingStart { conversation_id: Uuid },

    /// Explicitly stop the typing indicator
    TypingStop { conversation_id: Uuid },

    /// Report which conversation is currently on screen (None = none)
    ViewConversation { conversation_id: Option<Uuid> },
}
