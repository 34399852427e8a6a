use chrono::Utc;
use rusqlite::{Connection, Row};
use tracing::debug;

use messagely_types::models::{
    MessageDetail, MessageParty, NewMessage, ReadReceipt, ReceivedMessage, SentMessage, User,
    UserSummary,
};

use crate::models::{NewUser, RegisteredUser};
use crate::password::{self, PasswordConfig};
use crate::{Database, DbError, Result};

impl Database {
    // -- Users --

    /// Hash the password and insert the user. A taken username surfaces as
    /// the store's constraint violation.
    pub fn register(&self, user: &NewUser, config: &PasswordConfig) -> Result<RegisteredUser> {
        let digest = password::hash_password(&user.password, config)?;
        let now = Utc::now();

        self.with_conn(|conn| {
            let row = conn.query_row(
                "INSERT INTO users (username, password, first_name, last_name, phone, join_at, last_login_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 RETURNING username, password, first_name, last_name, phone",
                rusqlite::params![
                    user.username,
                    digest,
                    user.first_name,
                    user.last_name,
                    user.phone,
                    now
                ],
                |row| {
                    Ok(RegisteredUser {
                        username: row.get(0)?,
                        password: row.get(1)?,
                        first_name: row.get(2)?,
                        last_name: row.get(3)?,
                        phone: row.get(4)?,
                    })
                },
            )?;
            Ok(row)
        })
    }

    /// Unknown user and wrong password both yield `false`.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<bool> {
        let digest = self.with_conn(|conn| {
            conn.query_row("SELECT password FROM users WHERE username = ?1", [username], |row| {
                row.get::<_, String>(0)
            })
            .optional()
        })?;

        match digest {
            Some(digest) => password::verify_password(password, &digest),
            None => Ok(false),
        }
    }

    /// Stamp `last_login_at`. Unknown usernames are a silent no-op.
    pub fn update_login_timestamp(&self, username: &str) -> Result<()> {
        let updated = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE users SET last_login_at = ?1 WHERE username = ?2",
                rusqlite::params![Utc::now(), username],
            )?)
        })?;

        if updated == 0 {
            debug!("Login timestamp not updated, no user {}", username);
        }
        Ok(())
    }

    pub fn all_users(&self) -> Result<Vec<UserSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT username, first_name, last_name
                 FROM users
                 ORDER BY username",
            )?;

            let rows = stmt
                .query_map([], |row| {
                    Ok(UserSummary {
                        username: row.get(0)?,
                        first_name: row.get(1)?,
                        last_name: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn get_user(&self, username: &str) -> Result<User> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT username, first_name, last_name, phone, join_at, last_login_at
                 FROM users
                 WHERE username = ?1",
                [username],
                |row| {
                    Ok(User {
                        username: row.get(0)?,
                        first_name: row.get(1)?,
                        last_name: row.get(2)?,
                        phone: row.get(3)?,
                        join_at: row.get(4)?,
                        last_login_at: row.get(5)?,
                    })
                },
            )
            .optional()
        })?
        .ok_or_else(|| DbError::NotFound(format!("Username {} not found", username)))
    }

    /// Messages sent by `username`, oldest first. No existence check.
    pub fn messages_from(&self, username: &str) -> Result<Vec<SentMessage>> {
        self.with_conn(|conn| {
            query_conversation(conn, Direction::From, username, |row| {
                Ok(SentMessage {
                    id: row.get(0)?,
                    to_user: party_at(row, 1)?,
                    body: row.get(5)?,
                    sent_at: row.get(6)?,
                    read_at: row.get(7)?,
                })
            })
        })
    }

    /// Messages received by `username`, oldest first. No existence check.
    pub fn messages_to(&self, username: &str) -> Result<Vec<ReceivedMessage>> {
        self.with_conn(|conn| {
            query_conversation(conn, Direction::To, username, |row| {
                Ok(ReceivedMessage {
                    id: row.get(0)?,
                    from_user: party_at(row, 1)?,
                    body: row.get(5)?,
                    sent_at: row.get(6)?,
                    read_at: row.get(7)?,
                })
            })
        })
    }

    // -- Messages --

    pub fn create_message(&self, from_username: &str, to_username: &str, body: &str) -> Result<NewMessage> {
        self.with_conn(|conn| {
            let row = conn.query_row(
                "INSERT INTO messages (from_username, to_username, body, sent_at)
                 VALUES (?1, ?2, ?3, ?4)
                 RETURNING id, from_username, to_username, body, sent_at",
                rusqlite::params![from_username, to_username, body, Utc::now()],
                |row| {
                    Ok(NewMessage {
                        id: row.get(0)?,
                        from_username: row.get(1)?,
                        to_username: row.get(2)?,
                        body: row.get(3)?,
                        sent_at: row.get(4)?,
                    })
                },
            )?;
            Ok(row)
        })
    }

    pub fn get_message(&self, id: i64) -> Result<MessageDetail> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT m.id,
                        f.username, f.first_name, f.last_name, f.phone,
                        t.username, t.first_name, t.last_name, t.phone,
                        m.body, m.sent_at, m.read_at
                 FROM messages AS m
                   JOIN users AS f ON f.username = m.from_username
                   JOIN users AS t ON t.username = m.to_username
                 WHERE m.id = ?1",
                [id],
                |row| {
                    Ok(MessageDetail {
                        id: row.get(0)?,
                        from_user: party_at(row, 1)?,
                        to_user: party_at(row, 5)?,
                        body: row.get(9)?,
                        sent_at: row.get(10)?,
                        read_at: row.get(11)?,
                    })
                },
            )
            .optional()
        })?
        .ok_or_else(|| no_such_message(id))
    }

    /// Set `read_at` to now if `recipient` received message `id`. The
    /// recipient check is part of the UPDATE itself. `Ok(None)` means the
    /// message exists but was sent to someone else. Marking twice moves the
    /// timestamp forward.
    pub fn mark_read(&self, id: i64, recipient: &str) -> Result<Option<ReadReceipt>> {
        self.with_conn(|conn| {
            let receipt = conn
                .query_row(
                    "UPDATE messages SET read_at = ?1
                     WHERE id = ?2 AND to_username = ?3
                     RETURNING id, read_at",
                    rusqlite::params![Utc::now(), id, recipient],
                    |row| {
                        Ok(ReadReceipt {
                            id: row.get(0)?,
                            read_at: row.get(1)?,
                        })
                    },
                )
                .optional()?;

            if receipt.is_some() {
                return Ok(receipt);
            }

            // Nothing updated: tell a foreign message from a missing one
            let exists = conn
                .query_row("SELECT 1 FROM messages WHERE id = ?1", [id], |_| Ok(()))
                .optional()?
                .is_some();

            if exists { Ok(None) } else { Err(no_such_message(id)) }
        })
    }
}

#[derive(Clone, Copy)]
enum Direction {
    /// Filter on sender, join the recipient.
    From,
    /// Filter on recipient, join the sender.
    To,
}

fn query_conversation<T, F>(conn: &Connection, direction: Direction, username: &str, map: F) -> Result<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let sql = match direction {
        Direction::From => {
            "SELECT m.id, u.username, u.first_name, u.last_name, u.phone, m.body, m.sent_at, m.read_at
             FROM users AS u
               JOIN messages AS m ON u.username = m.to_username
             WHERE m.from_username = ?1
             ORDER BY m.id"
        }
        Direction::To => {
            "SELECT m.id, u.username, u.first_name, u.last_name, u.phone, m.body, m.sent_at, m.read_at
             FROM users AS u
               JOIN messages AS m ON u.username = m.from_username
             WHERE m.to_username = ?1
             ORDER BY m.id"
        }
    };

    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([username], map)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn party_at(row: &Row<'_>, start: usize) -> rusqlite::Result<MessageParty> {
    Ok(MessageParty {
        username: row.get(start)?,
        first_name: row.get(start + 1)?,
        last_name: row.get(start + 2)?,
        phone: row.get(start + 3)?,
    })
}

fn no_such_message(id: i64) -> DbError {
    DbError::NotFound(format!("No such message: {}", id))
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;
    use std::time::Duration;

    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn fast_hash() -> PasswordConfig {
        PasswordConfig::new(1)
    }

    fn new_user(username: &str, first_name: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            password: format!("{}-password", username),
            first_name: first_name.to_string(),
            last_name: "Tester".to_string(),
            phone: "+14155550100".to_string(),
        }
    }

    fn register(db: &Database, username: &str, first_name: &str) -> RegisteredUser {
        db.register(&new_user(username, first_name), &fast_hash()).unwrap()
    }

    // -- Users --

    #[test]
    fn register_then_get_matches_input() {
        let db = test_db();
        let input = new_user("alice", "Alice");

        let registered = db.register(&input, &fast_hash()).unwrap();
        assert_eq!(registered.username, "alice");
        assert_ne!(registered.password, input.password);

        let user = db.get_user("alice").unwrap();
        assert_eq!(user.username, input.username);
        assert_eq!(user.first_name, input.first_name);
        assert_eq!(user.last_name, input.last_name);
        assert_eq!(user.phone, input.phone);
        assert_eq!(user.join_at, user.last_login_at);
    }

    #[test]
    fn stored_digest_is_not_plaintext() {
        let db = test_db();
        register(&db, "alice", "Alice");

        let stored: String = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT password FROM users WHERE username = 'alice'", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_ne!(stored, "alice-password");
        assert!(password::verify_password("alice-password", &stored).unwrap());
    }

    #[test]
    fn registered_user_debug_redacts_digest() {
        let db = test_db();
        let registered = register(&db, "alice", "Alice");
        let printed = format!("{:?}", registered);
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains(&registered.password));
    }

    #[test]
    fn authenticate_checks_password() {
        let db = test_db();
        register(&db, "alice", "Alice");

        assert!(db.authenticate("alice", "alice-password").unwrap());
        assert!(!db.authenticate("alice", "wrong-password").unwrap());
    }

    #[test]
    fn authenticate_unknown_user_is_false_not_error() {
        let db = test_db();
        assert!(!db.authenticate("ghost", "anything").unwrap());
    }

    #[test]
    fn get_unknown_user_is_not_found() {
        let db = test_db();
        let err = db.get_user("ghost").unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
        assert_eq!(err.to_string(), "Username ghost not found");
    }

    #[test]
    fn duplicate_registration_conflicts_and_keeps_first() {
        let db = test_db();
        register(&db, "alice", "Alice");

        let mut second = new_user("alice", "Impostor");
        second.password = "other-password".to_string();
        let err = db.register(&second, &fast_hash()).unwrap_err();
        assert!(err.is_unique_violation());

        let user = db.get_user("alice").unwrap();
        assert_eq!(user.first_name, "Alice");
        assert!(db.authenticate("alice", "alice-password").unwrap());
        assert!(!db.authenticate("alice", "other-password").unwrap());
    }

    #[test]
    fn update_login_timestamp_moves_forward() {
        let db = test_db();
        register(&db, "alice", "Alice");
        let before = db.get_user("alice").unwrap();

        sleep(Duration::from_millis(5));
        db.update_login_timestamp("alice").unwrap();

        let after = db.get_user("alice").unwrap();
        assert!(after.last_login_at > before.last_login_at);
        assert_eq!(after.join_at, before.join_at);
    }

    #[test]
    fn update_login_timestamp_unknown_user_is_noop() {
        let db = test_db();
        db.update_login_timestamp("ghost").unwrap();
        assert!(matches!(db.get_user("ghost"), Err(DbError::NotFound(_))));
    }

    #[test]
    fn all_users_sorted_by_username() {
        let db = test_db();
        register(&db, "mallory", "Mallory");
        register(&db, "carol", "Carol");

        let names: Vec<String> = db.all_users().unwrap().into_iter().map(|u| u.username).collect();
        assert_eq!(names, vec!["carol", "mallory"]);

        register(&db, "alice", "Alice");
        let users = db.all_users().unwrap();
        let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["alice", "carol", "mallory"]);
        assert_eq!(
            users[0],
            UserSummary {
                username: "alice".into(),
                first_name: "Alice".into(),
                last_name: "Tester".into(),
            }
        );
    }

    #[test]
    fn all_users_empty() {
        let db = test_db();
        assert!(db.all_users().unwrap().is_empty());
    }

    // -- Messages --

    #[test]
    fn messages_from_ordered_with_recipient_profile() {
        let db = test_db();
        register(&db, "alice", "Alice");
        register(&db, "bob", "Bob");
        register(&db, "carol", "Carol");

        let first = db.create_message("alice", "carol", "first").unwrap();
        let second = db.create_message("alice", "bob", "second").unwrap();
        db.create_message("bob", "alice", "reply").unwrap();

        let sent = db.messages_from("alice").unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].id, first.id);
        assert_eq!(sent[1].id, second.id);
        assert!(sent[0].id < sent[1].id);

        let carol = db.get_user("carol").unwrap();
        assert_eq!(sent[0].to_user.username, carol.username);
        assert_eq!(sent[0].to_user.first_name, carol.first_name);
        assert_eq!(sent[0].to_user.last_name, carol.last_name);
        assert_eq!(sent[0].to_user.phone, carol.phone);
        assert_eq!(sent[0].body, "first");
        assert_eq!(sent[0].sent_at, first.sent_at);
        assert!(sent[0].read_at.is_none());
    }

    #[test]
    fn messages_to_mirrors_sender() {
        let db = test_db();
        register(&db, "alice", "Alice");
        register(&db, "bob", "Bob");

        db.create_message("bob", "alice", "one").unwrap();
        db.create_message("alice", "bob", "not mine").unwrap();
        db.create_message("bob", "alice", "two").unwrap();

        let received = db.messages_to("alice").unwrap();
        let bodies: Vec<&str> = received.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["one", "two"]);
        assert!(received.iter().all(|m| m.from_user.username == "bob"));
        assert_eq!(received[0].from_user.first_name, "Bob");
    }

    #[test]
    fn conversations_of_unknown_user_are_empty() {
        let db = test_db();
        assert!(db.messages_from("ghost").unwrap().is_empty());
        assert!(db.messages_to("ghost").unwrap().is_empty());
    }

    #[test]
    fn create_message_to_unknown_user_violates_foreign_key() {
        let db = test_db();
        register(&db, "alice", "Alice");

        let err = db.create_message("alice", "ghost", "hello?").unwrap_err();
        assert_eq!(err.constraint_code(), Some(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY));
        assert!(db.messages_from("alice").unwrap().is_empty());
    }

    #[test]
    fn get_message_expands_both_parties() {
        let db = test_db();
        register(&db, "alice", "Alice");
        register(&db, "bob", "Bob");

        let created = db.create_message("alice", "bob", "hi bob").unwrap();
        let detail = db.get_message(created.id).unwrap();

        assert_eq!(detail.id, created.id);
        assert_eq!(detail.from_user.username, "alice");
        assert_eq!(detail.to_user.username, "bob");
        assert_eq!(detail.to_user.first_name, "Bob");
        assert_eq!(detail.body, "hi bob");
        assert!(detail.read_at.is_none());
    }

    #[test]
    fn get_unknown_message_is_not_found() {
        let db = test_db();
        let err = db.get_message(42).unwrap_err();
        assert_eq!(err.to_string(), "No such message: 42");
    }

    #[test]
    fn mark_read_sets_read_at() {
        let db = test_db();
        register(&db, "alice", "Alice");
        register(&db, "bob", "Bob");
        let created = db.create_message("alice", "bob", "hi").unwrap();

        let receipt = db.mark_read(created.id, "bob").unwrap().unwrap();
        assert_eq!(receipt.id, created.id);
        assert!(receipt.read_at >= created.sent_at);

        let sent = db.messages_from("alice").unwrap();
        assert_eq!(sent[0].read_at, Some(receipt.read_at));
    }

    #[test]
    fn mark_read_refuses_anyone_but_recipient() {
        let db = test_db();
        register(&db, "alice", "Alice");
        register(&db, "bob", "Bob");
        let created = db.create_message("alice", "bob", "hi").unwrap();

        assert!(db.mark_read(created.id, "alice").unwrap().is_none());
        assert!(db.mark_read(created.id, "ghost").unwrap().is_none());
        assert!(db.get_message(created.id).unwrap().read_at.is_none());
    }

    #[test]
    fn mark_read_unknown_message_is_not_found() {
        let db = test_db();
        assert!(matches!(db.mark_read(7, "bob"), Err(DbError::NotFound(_))));
    }
}
