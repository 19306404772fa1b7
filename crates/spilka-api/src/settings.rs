use axum::{Extension, Json, extract::State, response::IntoResponse};

use spilka_core::MessagingError;
use spilka_core::settings;
use spilka_types::api::{Claims, SettingsUpdate, UpdateSettingsResponse};

use crate::AppState;
use crate::error::ApiError;

/// Settings administration is a staff surface, gated on staff rank rather
/// than membership level.
fn require_staff_admin(state: &AppState, claims: &Claims) -> Result<(), ApiError> {
    let user = state
        .db
        .get_user(claims.sub)?
        .ok_or(MessagingError::Unauthorized)?;
    if !user.staff_role.is_staff_admin() {
        return Err(MessagingError::Forbidden("administrator access required").into());
    }
    Ok(())
}

pub async fn get_settings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    require_staff_admin(&state, &claims)?;
    let resolved = settings::resolve(&state.db)?;
    Ok(Json(resolved))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(update): Json<SettingsUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    require_staff_admin(&state, &claims)?;
    let updated_keys = settings::apply_update(&state.db, &update)?;
    Ok(Json(UpdateSettingsResponse { updated_keys }))
}
