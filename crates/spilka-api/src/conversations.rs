use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use spilka_types::api::{
    AddParticipantsRequest, AddParticipantsResponse, Claims, CreateGroupRequest,
    EnsureDirectRequest,
};

use crate::AppState;
use crate::error::ApiError;

/// Idempotent: 201 when a new conversation was created, 200 when the
/// existing one for the pair was returned.
pub async fn ensure_direct(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<EnsureDirectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (conversation, created) = state
        .directory
        .ensure_direct(claims.sub, req.other_user_id)
        .await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(conversation)))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .directory
        .create_group(claims.sub, req.name, req.description)
        .await?;

    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = state.directory.list_conversations(claims.sub)?;
    Ok(Json(conversations))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .directory
        .get_conversation(conversation_id, claims.sub)?;
    Ok(Json(conversation))
}

pub async fn list_participants(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let roster = state
        .directory
        .list_participants(conversation_id, claims.sub)?;
    Ok(Json(roster))
}

pub async fn add_participants(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddParticipantsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let added_count = state
        .directory
        .add_participants(conversation_id, claims.sub, req.user_ids)
        .await?;

    Ok(Json(AddParticipantsResponse { added_count }))
}

pub async fn remove_participant(
    State(state): State<AppState>,
    Path((conversation_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .directory
        .remove_participant(conversation_id, claims.sub, user_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
