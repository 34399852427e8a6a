use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (users, messages)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                username        TEXT PRIMARY KEY,
                password        TEXT NOT NULL,
                first_name      TEXT NOT NULL,
                last_name       TEXT NOT NULL,
                phone           TEXT NOT NULL,
                join_at         TEXT NOT NULL,
                last_login_at   TEXT NOT NULL
            );

            CREATE TABLE messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                from_username   TEXT NOT NULL REFERENCES users(username),
                to_username     TEXT NOT NULL REFERENCES users(username),
                body            TEXT NOT NULL,
                sent_at         TEXT NOT NULL,
                read_at         TEXT
            );

            CREATE INDEX idx_messages_from ON messages(from_username, id);
            CREATE INDEX idx_messages_to ON messages(to_username, id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
