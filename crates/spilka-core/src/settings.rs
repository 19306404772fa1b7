//! Settings resolution and the administrative update surface.
//!
//! Raw `messaging_*` key/value pairs from the settings store are parsed and
//! overlaid onto hard defaults; a missing or malformed key falls back to the
//! default instead of failing the request. Every operation resolves a fresh
//! snapshot so an administrative change never produces a half-updated view
//! mid-request.

use std::str::FromStr;

use chrono::Utc;
use tracing::{debug, warn};

use spilka_db::Database;
use spilka_types::api::SettingsUpdate;
use spilka_types::roles::MembershipRole;
use spilka_types::settings::MessagingSettings;

use crate::error::{MessagingError, Result};

const PREFIX: &str = "messaging_";

pub fn resolve(db: &Database) -> Result<MessagingSettings> {
    let mut settings = MessagingSettings::default();
    for (key, value) in db.settings_with_prefix(PREFIX)? {
        apply_key(&mut settings, &key, &value);
    }
    Ok(settings)
}

fn apply_key(settings: &mut MessagingSettings, key: &str, raw: &str) {
    match key {
        "messaging_enabled" => set_bool(&mut settings.enabled, key, raw),
        "messaging_dm_enabled" => set_bool(&mut settings.dm_enabled, key, raw),
        "messaging_group_chat_enabled" => set_bool(&mut settings.group_chat_enabled, key, raw),
        "messaging_same_group_enabled" => set_bool(&mut settings.same_group_enabled, key, raw),
        "messaging_cross_group_enabled" => set_bool(&mut settings.cross_group_enabled, key, raw),
        "messaging_attachments_enabled" => set_bool(&mut settings.attachments_enabled, key, raw),
        "messaging_dm_initiator_roles" => set_roles(&mut settings.dm_initiator_roles, key, raw),
        "messaging_group_creator_roles" => set_roles(&mut settings.group_creator_roles, key, raw),
        "messaging_max_attachment_size_mb" => {
            set_u32(&mut settings.max_attachment_size_mb, key, raw)
        }
        "messaging_rate_limit_messages_per_minute" => {
            set_u32(&mut settings.rate_limit_messages_per_minute, key, raw)
        }
        "messaging_max_group_participants" => {
            set_u32(&mut settings.max_group_participants, key, raw)
        }
        "messaging_edit_window_minutes" => set_u32(&mut settings.edit_window_minutes, key, raw),
        "messaging_allowed_attachment_types" => {
            set_strings(&mut settings.allowed_attachment_types, key, raw)
        }
        other => debug!("ignoring unknown settings key {other}"),
    }
}

fn set_bool(target: &mut bool, key: &str, raw: &str) {
    match raw.trim() {
        "true" | "1" => *target = true,
        "false" | "0" => *target = false,
        _ => warn!("malformed boolean for {key}: {raw:?}, keeping default"),
    }
}

fn set_u32(target: &mut u32, key: &str, raw: &str) {
    match raw.trim().parse::<u32>() {
        Ok(value) => *target = value,
        Err(_) => warn!("malformed number for {key}: {raw:?}, keeping default"),
    }
}

/// Arrays are stored either as a JSON array or a comma-separated list.
fn parse_list(raw: &str) -> Vec<String> {
    if let Ok(values) = serde_json::from_str::<Vec<String>>(raw) {
        return values;
    }
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn set_roles(target: &mut Vec<MembershipRole>, key: &str, raw: &str) {
    let mut roles = Vec::new();
    for item in parse_list(raw) {
        match MembershipRole::from_str(&item) {
            Ok(role) => roles.push(role),
            Err(_) => warn!("unknown role {item:?} in {key}, skipping"),
        }
    }
    *target = roles;
}

fn set_strings(target: &mut Vec<String>, _key: &str, raw: &str) {
    *target = parse_list(raw);
}

/// Validate and persist a partial settings write. Only the provided keys are
/// stored; the returned list names what changed.
pub fn apply_update(db: &Database, update: &SettingsUpdate) -> Result<Vec<String>> {
    validate_update(update)?;

    let now = Utc::now();
    let mut updated = Vec::new();

    let mut put = |key: &'static str, value: String| -> Result<()> {
        db.upsert_setting(key, &value, now)?;
        updated.push(key.to_string());
        Ok(())
    };

    if let Some(v) = update.enabled {
        put("messaging_enabled", v.to_string())?;
    }
    if let Some(v) = update.dm_enabled {
        put("messaging_dm_enabled", v.to_string())?;
    }
    if let Some(v) = update.group_chat_enabled {
        put("messaging_group_chat_enabled", v.to_string())?;
    }
    if let Some(v) = update.same_group_enabled {
        put("messaging_same_group_enabled", v.to_string())?;
    }
    if let Some(v) = update.cross_group_enabled {
        put("messaging_cross_group_enabled", v.to_string())?;
    }
    if let Some(v) = update.attachments_enabled {
        put("messaging_attachments_enabled", v.to_string())?;
    }
    if let Some(roles) = &update.dm_initiator_roles {
        put("messaging_dm_initiator_roles", roles_to_json(roles)?)?;
    }
    if let Some(roles) = &update.group_creator_roles {
        put("messaging_group_creator_roles", roles_to_json(roles)?)?;
    }
    if let Some(v) = update.max_attachment_size_mb {
        put("messaging_max_attachment_size_mb", v.to_string())?;
    }
    if let Some(v) = update.rate_limit_messages_per_minute {
        put("messaging_rate_limit_messages_per_minute", v.to_string())?;
    }
    if let Some(v) = update.max_group_participants {
        put("messaging_max_group_participants", v.to_string())?;
    }
    if let Some(v) = update.edit_window_minutes {
        put("messaging_edit_window_minutes", v.to_string())?;
    }
    if let Some(types) = &update.allowed_attachment_types {
        put(
            "messaging_allowed_attachment_types",
            serde_json::to_string(types).map_err(anyhow::Error::from)?,
        )?;
    }

    Ok(updated)
}

fn roles_to_json(roles: &[MembershipRole]) -> Result<String> {
    let names: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
    Ok(serde_json::to_string(&names).map_err(anyhow::Error::from)?)
}

fn validate_update(update: &SettingsUpdate) -> Result<()> {
    if let Some(mb) = update.max_attachment_size_mb {
        if !(1..=500).contains(&mb) {
            return Err(MessagingError::Validation(
                "max_attachment_size_mb must be between 1 and 500".to_string(),
            ));
        }
    }
    if let Some(rate) = update.rate_limit_messages_per_minute {
        if !(1..=600).contains(&rate) {
            return Err(MessagingError::Validation(
                "rate_limit_messages_per_minute must be between 1 and 600".to_string(),
            ));
        }
    }
    if let Some(cap) = update.max_group_participants {
        if !(2..=10_000).contains(&cap) {
            return Err(MessagingError::Validation(
                "max_group_participants must be between 2 and 10000".to_string(),
            ));
        }
    }
    if let Some(window) = update.edit_window_minutes {
        if window > 10_080 {
            return Err(MessagingError::Validation(
                "edit_window_minutes must be at most 10080".to_string(),
            ));
        }
    }
    if let Some(types) = &update.allowed_attachment_types {
        for mime in types {
            if !mime.contains('/') || mime.trim().is_empty() {
                return Err(MessagingError::Validation(format!(
                    "'{mime}' is not a valid MIME type"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_store_yields_defaults() {
        let db = Database::open_in_memory().unwrap();
        let settings = resolve(&db).unwrap();
        assert_eq!(settings, MessagingSettings::default());
    }

    #[test]
    fn stored_keys_overlay_defaults() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.upsert_setting("messaging_enabled", "false", now).unwrap();
        db.upsert_setting("messaging_rate_limit_messages_per_minute", "5", now)
            .unwrap();
        db.upsert_setting(
            "messaging_dm_initiator_roles",
            r#"["supporter", "member"]"#,
            now,
        )
        .unwrap();

        let settings = resolve(&db).unwrap();
        assert!(!settings.enabled);
        assert_eq!(settings.rate_limit_messages_per_minute, 5);
        assert_eq!(
            settings.dm_initiator_roles,
            vec![MembershipRole::Supporter, MembershipRole::Member]
        );
        // untouched keys keep their defaults
        assert_eq!(settings.edit_window_minutes, 15);
    }

    #[test]
    fn malformed_values_fall_back_to_defaults() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.upsert_setting("messaging_enabled", "banana", now).unwrap();
        db.upsert_setting("messaging_edit_window_minutes", "-3", now).unwrap();
        db.upsert_setting("messaging_group_creator_roles", r#"["tsar"]"#, now)
            .unwrap();

        let settings = resolve(&db).unwrap();
        assert!(settings.enabled);
        assert_eq!(settings.edit_window_minutes, 15);
        assert!(settings.group_creator_roles.is_empty());
    }

    #[test]
    fn comma_separated_lists_are_accepted() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_setting(
            "messaging_allowed_attachment_types",
            "image/png, image/jpeg",
            Utc::now(),
        )
        .unwrap();

        let settings = resolve(&db).unwrap();
        assert_eq!(
            settings.allowed_attachment_types,
            vec!["image/png".to_string(), "image/jpeg".to_string()]
        );
    }

    #[test]
    fn update_round_trips_through_the_store() {
        let db = Database::open_in_memory().unwrap();
        let update = SettingsUpdate {
            rate_limit_messages_per_minute: Some(5),
            dm_initiator_roles: Some(vec![MembershipRole::Candidate]),
            ..SettingsUpdate::default()
        };

        let updated = apply_update(&db, &update).unwrap();
        assert_eq!(
            updated,
            vec![
                "messaging_dm_initiator_roles".to_string(),
                "messaging_rate_limit_messages_per_minute".to_string(),
            ]
        );

        let settings = resolve(&db).unwrap();
        assert_eq!(settings.rate_limit_messages_per_minute, 5);
        assert_eq!(settings.dm_initiator_roles, vec![MembershipRole::Candidate]);
    }

    #[test]
    fn update_bounds_are_enforced() {
        let db = Database::open_in_memory().unwrap();

        let zero_rate = SettingsUpdate {
            rate_limit_messages_per_minute: Some(0),
            ..SettingsUpdate::default()
        };
        assert!(matches!(
            apply_update(&db, &zero_rate),
            Err(MessagingError::Validation(_))
        ));

        let tiny_group = SettingsUpdate {
            max_group_participants: Some(1),
            ..SettingsUpdate::default()
        };
        assert!(matches!(
            apply_update(&db, &tiny_group),
            Err(MessagingError::Validation(_))
        ));

        let bad_mime = SettingsUpdate {
            allowed_attachment_types: Some(vec!["png".to_string()]),
            ..SettingsUpdate::default()
        };
        assert!(matches!(
            apply_update(&db, &bad_mime),
            Err(MessagingError::Validation(_))
        ));

        // nothing was stored on the failed writes
        assert!(db.settings_with_prefix("messaging_").unwrap().is_empty());
    }
}
