use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Attachment, ParticipantRole};
use crate::roles::MembershipRole;

// -- JWT Claims --

/// Claims shared by the REST middleware and the WebSocket Identify handshake.
/// Session issuance belongs to the external auth service; messaging only
/// validates tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnsureDirectRequest {
    pub other_user_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddParticipantsRequest {
    pub user_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct AddParticipantsResponse {
    pub added_count: u32,
}

/// Roster entry: participant state plus the public profile fields of the
/// user. Private directory fields (referrer, staff role) are never exposed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub is_muted: bool,
    pub joined_at: DateTime<Utc>,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: Option<String>,
    pub membership_role: MembershipRole,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub reply_to_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditMessageRequest {
    pub content: String,
}

// -- Administrative settings --

/// Partial settings write; only present keys are validated and stored.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsUpdate {
    pub enabled: Option<bool>,
    pub dm_enabled: Option<bool>,
    pub group_chat_enabled: Option<bool>,
    pub same_group_enabled: Option<bool>,
    pub cross_group_enabled: Option<bool>,
    pub attachments_enabled: Option<bool>,
    pub dm_initiator_roles: Option<Vec<MembershipRole>>,
    pub group_creator_roles: Option<Vec<MembershipRole>>,
    pub max_attachment_size_mb: Option<u32>,
    pub rate_limit_messages_per_minute: Option<u32>,
    pub max_group_participants: Option<u32>,
    pub edit_window_minutes: Option<u32>,
    pub allowed_attachment_types: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct UpdateSettingsResponse {
    pub updated_keys: Vec<String>,
}
