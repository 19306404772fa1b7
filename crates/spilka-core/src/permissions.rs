//! Pure authorization decisions over role and settings snapshots.
//!
//! Nothing in this module touches storage or the clock beyond the edit
//! window check; callers gather the facts, these functions only decide.

use chrono::{Duration, Utc};
use uuid::Uuid;

use spilka_types::models::{Attachment, Message, ParticipantRole, UserProfile};
use spilka_types::roles::{MembershipRole, StaffRole};
use spilka_types::settings::MessagingSettings;

use crate::error::MessagingError;

/// Relationship facts between a sender and a recipient, gathered from the
/// user directory before the decision is made.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationshipFacts {
    /// Recipient is anywhere in the sender's referral tree.
    pub recipient_in_sender_tree: bool,
    /// Recipient was invited directly by the sender.
    pub recipient_is_direct_referral: bool,
    /// How many users the sender invited directly.
    pub sender_direct_referral_count: u32,
    /// Sender and recipient belong to the same org group.
    pub share_group: bool,
    /// Sender leads the group the recipient belongs to.
    pub sender_leads_recipient_group: bool,
}

pub fn can_initiate_dms(
    role: MembershipRole,
    staff_role: StaffRole,
    settings: &MessagingSettings,
) -> bool {
    if !settings.enabled || !settings.dm_enabled {
        return false;
    }
    if staff_role.is_staff_admin() {
        return true;
    }
    if role.is_regional_leader() {
        return true;
    }
    settings.dm_initiator_roles.contains(&role)
}

pub fn can_create_group_chats(
    role: MembershipRole,
    staff_role: StaffRole,
    settings: &MessagingSettings,
) -> bool {
    if !settings.enabled || !settings.group_chat_enabled {
        return false;
    }
    if staff_role.is_staff_admin() {
        return true;
    }
    if role.is_regional_leader() {
        return true;
    }
    settings.group_creator_roles.contains(&role)
}

pub fn can_send_attachments(settings: &MessagingSettings) -> bool {
    settings.enabled && settings.attachments_enabled
}

/// The central reachability decision, first match wins.
///
/// The rules encode the organization's social graph: you may reach the
/// people you are responsible for (your referral tree, the group you lead),
/// your peers in leadership, and optionally your own group. Staff keeps
/// full reach for moderation.
pub fn can_message_user(
    sender: &UserProfile,
    recipient: &UserProfile,
    facts: &RelationshipFacts,
    settings: &MessagingSettings,
) -> bool {
    // 1. Staff admins reach anyone.
    if sender.staff_role.is_staff_admin() {
        return true;
    }
    // 2. Regional leaders and above reach their whole referral tree.
    if sender.membership_role.is_regional_leader() && facts.recipient_in_sender_tree {
        return true;
    }
    // 3. Two or more direct referrals unlock messaging your direct referrals.
    if facts.sender_direct_referral_count >= 2 && facts.recipient_is_direct_referral {
        return true;
    }
    // 4. Leaders reach each other.
    if sender.membership_role.is_leader() && recipient.membership_role.is_leader() {
        return true;
    }
    // 5. Leaders reach members of groups they lead.
    if sender.membership_role.is_leader() && facts.sender_leads_recipient_group {
        return true;
    }
    // 6. Same-group messaging, when enabled.
    if settings.same_group_enabled && facts.share_group {
        return true;
    }
    // 7. Fallback inherited from an earlier permission iteration: anyone who
    // qualifies to initiate DMs reaches their direct referrals. Overlaps
    // rule 3; kept for behavioral parity.
    if can_initiate_dms(sender.membership_role, sender.staff_role, settings)
        && facts.recipient_is_direct_referral
    {
        return true;
    }
    false
}

/// Only owners and admins manage the roster.
pub fn can_add_to_group(role: ParticipantRole, settings: &MessagingSettings) -> bool {
    if !settings.enabled || !settings.group_chat_enabled {
        return false;
    }
    matches!(role, ParticipantRole::Owner | ParticipantRole::Admin)
}

/// Owner removes anyone, admin removes plain members, member removes no one.
/// Self-removal (leaving) is decided by the caller, not here.
pub fn can_remove_from_group(remover: ParticipantRole, target: ParticipantRole) -> bool {
    match remover {
        ParticipantRole::Owner => true,
        ParticipantRole::Admin => target == ParticipantRole::Member,
        ParticipantRole::Member => false,
    }
}

/// Sender-only, inside the configured window. System messages never have a
/// sender, so they can never pass.
pub fn can_edit_message(user_id: Uuid, message: &Message, settings: &MessagingSettings) -> bool {
    if message.sender_id != Some(user_id) {
        return false;
    }
    let window = Duration::minutes(i64::from(settings.edit_window_minutes));
    Utc::now() - message.created_at <= window
}

/// Sender always deletes their own; owners and admins moderate the rest.
pub fn can_delete_message(
    user_id: Uuid,
    participant_role: ParticipantRole,
    message: &Message,
) -> bool {
    if message.sender_id == Some(user_id) {
        return true;
    }
    matches!(
        participant_role,
        ParticipantRole::Owner | ParticipantRole::Admin
    )
}

pub fn validate_attachment(
    attachment: &Attachment,
    settings: &MessagingSettings,
) -> Result<(), MessagingError> {
    let max_bytes = u64::from(settings.max_attachment_size_mb) * 1024 * 1024;
    if attachment.size_bytes > max_bytes {
        return Err(MessagingError::Validation(format!(
            "attachment '{}' exceeds the {} MB limit",
            attachment.name, settings.max_attachment_size_mb
        )));
    }
    if !settings.allowed_attachment_types.is_empty()
        && !settings
            .allowed_attachment_types
            .iter()
            .any(|t| t == &attachment.mime_type)
    {
        return Err(MessagingError::Validation(format!(
            "attachment type '{}' is not allowed",
            attachment.mime_type
        )));
    }
    Ok(())
}

/// The rolling rate-limit window is fixed at one minute.
pub const RATE_WINDOW_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Sends left in the window after this one is accepted.
    pub remaining: u32,
    pub reset_after_secs: u64,
}

pub fn check_message_rate_limit(
    recent_count: u32,
    settings: &MessagingSettings,
) -> RateLimitDecision {
    let limit = settings.rate_limit_messages_per_minute;
    if recent_count >= limit {
        RateLimitDecision {
            allowed: false,
            remaining: 0,
            reset_after_secs: RATE_WINDOW_SECS,
        }
    } else {
        RateLimitDecision {
            allowed: true,
            remaining: limit - recent_count - 1,
            reset_after_secs: RATE_WINDOW_SECS,
        }
    }
}
