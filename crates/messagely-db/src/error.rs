use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    NotFound(String),

    #[error("Password hashing error: {0}")]
    Hash(String),

    #[error("DB lock poisoned: {0}")]
    LockPoisoned(String),
}

impl DbError {
    /// The SQLite extended result code, when the store rejected a statement
    /// because of a constraint.
    pub fn constraint_code(&self) -> Option<i32> {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Some(err.extended_code)
            }
            _ => None,
        }
    }

    /// True when the store rejected a duplicate primary key or unique value.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self.constraint_code(),
            Some(rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)
        )
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
