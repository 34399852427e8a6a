use axum::{
    Extension, Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
};
use tracing::info;

use messagely_types::api::{
    Claims, MessageDetailResponse, MessageResponse, NewMessageResponse, ReadReceiptResponse,
    SendMessageRequest,
};

use crate::auth::AppState;
use crate::{ApiError, blocking};

/// GET /messages/{id}: visible to its sender and recipient only.
pub async fn get_message(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MessageDetailResponse>, ApiError> {
    let Path(id) = path?;
    let message = blocking(&state, move |db| db.get_message(id)).await?;

    if message.from_user.username != claims.username && message.to_user.username != claims.username {
        return Err(ApiError::Unauthorized("Cannot read this message".to_string()));
    }

    Ok(Json(MessageResponse { message }))
}

/// POST /messages: the sender is always the token holder.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<NewMessageResponse>), ApiError> {
    let Json(req) = payload?;
    let from = claims.username;
    let message = blocking(&state, move |db| db.create_message(&from, &req.to_username, &req.body)).await?;

    info!(
        "Message {} sent from {} to {}",
        message.id, message.from_username, message.to_username
    );

    Ok((StatusCode::CREATED, Json(MessageResponse { message })))
}

/// POST /messages/{id}/read: only the recipient may mark a message read.
pub async fn mark_read(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ReadReceiptResponse>, ApiError> {
    let Path(id) = path?;
    let username = claims.username;

    let receipt = blocking(&state, move |db| db.mark_read(id, &username))
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Cannot set this message to read".to_string()))?;

    Ok(Json(MessageResponse { message: receipt }))
}
