pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod routes;
pub mod users;

pub use error::ApiError;

use tracing::error;

use messagely_db::Database;

use crate::auth::AppState;

/// Run a DB closure on the blocking pool. SQLite calls and argon2 hashing
/// never run on the async workers.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> messagely_db::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.to_string())
        })?
        .map_err(ApiError::from)
}
