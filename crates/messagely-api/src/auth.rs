use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{info, warn};

use messagely_db::models::NewUser;
use messagely_db::{Database, PasswordConfig};
use messagely_types::api::{Claims, LoginRequest, RegisterRequest, TokenResponse};

use crate::{ApiError, blocking};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub password: PasswordConfig,
}

/// POST /auth/register: create the user, stamp the login time, return a token.
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(req) = payload?;
    let new_user = NewUser::from(req);
    let password = state.password;

    // A taken username fails here with the store's constraint error
    let user = blocking(&state, move |db| {
        let user = db.register(&new_user, &password)?;
        db.update_login_timestamp(&user.username)?;
        Ok(user)
    })
    .await?;

    let token = create_token(&state.jwt_secret, &user.username)?;
    info!("Registered user {}", user.username);

    Ok(Json(TokenResponse { token }))
}

/// POST /auth/login: `{username, password}` => `{token}`.
///
/// The login timestamp is written before the response is built, so a
/// failed write fails the login instead of vanishing.
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(LoginRequest { username, password }) = payload?;

    let name = username.clone();
    let authenticated = blocking(&state, move |db| {
        if !db.authenticate(&name, &password)? {
            return Ok(false);
        }
        db.update_login_timestamp(&name)?;
        Ok(true)
    })
    .await?;

    if !authenticated {
        warn!("Failed login for {}", username);
        return Err(ApiError::Unauthorized("Invalid user/password".to_string()));
    }

    let token = create_token(&state.jwt_secret, &username)?;
    info!("User {} logged in", username);

    Ok(Json(TokenResponse { token }))
}

/// Sign a token whose only claim is `username`. No expiry is set.
pub fn create_token(secret: &str, username: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        username: username.to_string(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}
