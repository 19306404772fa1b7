use serde::{Deserialize, Serialize};

use crate::roles::MembershipRole;

/// Resolved messaging configuration.
///
/// Built once per operation from the settings store and passed around as an
/// immutable snapshot, so a single request never sees two different limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagingSettings {
    pub enabled: bool,
    pub dm_enabled: bool,
    pub group_chat_enabled: bool,
    pub same_group_enabled: bool,
    pub cross_group_enabled: bool,
    pub attachments_enabled: bool,
    /// Roles below regional leader that may still start DMs.
    pub dm_initiator_roles: Vec<MembershipRole>,
    pub group_creator_roles: Vec<MembershipRole>,
    pub max_attachment_size_mb: u32,
    pub rate_limit_messages_per_minute: u32,
    pub max_group_participants: u32,
    pub edit_window_minutes: u32,
    /// Empty list means any MIME type is accepted.
    pub allowed_attachment_types: Vec<String>,
}

impl Default for MessagingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dm_enabled: true,
            group_chat_enabled: true,
            same_group_enabled: true,
            cross_group_enabled: false,
            attachments_enabled: true,
            dm_initiator_roles: vec![
                MembershipRole::Member,
                MembershipRole::HonoraryMember,
                MembershipRole::NetworkLeader,
            ],
            group_creator_roles: vec![MembershipRole::NetworkLeader],
            max_attachment_size_mb: 25,
            rate_limit_messages_per_minute: 30,
            max_group_participants: 256,
            edit_window_minutes: 15,
            allowed_attachment_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/gif".to_string(),
                "image/webp".to_string(),
                "application/pdf".to_string(),
            ],
        }
    }
}
