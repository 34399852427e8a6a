use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::auth::{self, AppState};
use crate::middleware::require_auth;
use crate::{messages, users};

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/register", post(auth::register))
        .route("/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/users", get(users::list_users))
        .route("/users/{username}", get(users::get_user))
        .route("/users/{username}/to", get(users::messages_to))
        .route("/users/{username}/from", get(users::messages_from))
        .route("/messages", post(messages::send_message))
        .route("/messages/{id}", get(messages::get_message))
        .route("/messages/{id}/read", post(messages::mark_read))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
