use axum::{
    Extension, Json,
    extract::{Path, State},
};

use messagely_types::api::{
    Claims, ReceivedMessagesResponse, SentMessagesResponse, UserResponse, UsersResponse,
};

use crate::auth::AppState;
use crate::middleware::ensure_correct_user;
use crate::{ApiError, blocking};

/// GET /users: every user, ordered by username.
pub async fn list_users(State(state): State<AppState>) -> Result<Json<UsersResponse>, ApiError> {
    let users = blocking(&state, |db| db.all_users()).await?;
    Ok(Json(UsersResponse { users }))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserResponse>, ApiError> {
    ensure_correct_user(&claims, &username)?;

    let user = blocking(&state, move |db| db.get_user(&username)).await?;
    Ok(Json(UserResponse { user }))
}

/// GET /users/{username}/to
pub async fn messages_to(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ReceivedMessagesResponse>, ApiError> {
    ensure_correct_user(&claims, &username)?;

    let messages = blocking(&state, move |db| db.messages_to(&username)).await?;
    Ok(Json(ReceivedMessagesResponse { messages }))
}

/// GET /users/{username}/from
pub async fn messages_from(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SentMessagesResponse>, ApiError> {
    ensure_correct_user(&claims, &username)?;

    let messages = blocking(&state, move |db| db.messages_from(&username)).await?;
    Ok(Json(SentMessagesResponse { messages }))
}
