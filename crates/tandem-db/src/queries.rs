use crate::models::{MessageRow, ReactionRow, UserRow};
use crate::Database;
use anyhow::Result;
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str = "id, name, email, password, online, last_seen";
const MESSAGE_COLUMNS: &str =
    "id, conversation_id, author_id, sender, text, timestamp, seen, edited";

impl Database {
    // -- Users --

    /// New accounts start online, mirroring a sign-up that logs straight in.
    pub fn create_user(
        &self,
        id: &str,
        name: &str,
        email: &str,
        password_hash: &str,
        now_ms: i64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, password, online, last_seen) VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                rusqlite::params![id, name, email, password_hash, now_ms],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// All users in registration order.
    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users ORDER BY created_at, rowid",
                USER_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns true when the stored presence actually changed.
    pub fn set_presence(&self, id: &str, online: bool, last_seen_ms: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET online = ?2, last_seen = ?3
                 WHERE id = ?1 AND (online != ?2 OR last_seen IS NOT ?3)",
                rusqlite::params![id, online, last_seen_ms],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Messages --

    /// Appends a message and returns its store-assigned id.
    pub fn insert_message(
        &self,
        conversation_id: &str,
        author_id: &str,
        sender: &str,
        text: &str,
        timestamp_ms: i64,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (conversation_id, author_id, sender, text, timestamp, seen, edited)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, 0)",
                rusqlite::params![conversation_id, author_id, sender, text, timestamp_ms],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Every message of a conversation, oldest first.
    pub fn get_messages(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages WHERE conversation_id = ?1 ORDER BY id ASC",
                MESSAGE_COLUMNS
            ))?;
            let rows = stmt
                .query_map([conversation_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_message(&self, conversation_id: &str, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM messages WHERE id = ?1 AND conversation_id = ?2",
                    MESSAGE_COLUMNS
                ),
                rusqlite::params![id, conversation_id],
                message_from_row,
            )
            .optional()
        })
    }

    /// Flips `seen` on the given messages when they were written by the other
    /// side and are still unseen. Never clears the flag. Returns how many rows
    /// changed, so repeat calls report 0.
    pub fn mark_seen(&self, conversation_id: &str, ids: &[i64], viewer_sender: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "UPDATE messages SET seen = 1
                 WHERE id = ?1 AND conversation_id = ?2 AND sender != ?3 AND seen = 0",
            )?;
            let mut changed = 0;
            for id in ids {
                changed += stmt.execute(rusqlite::params![id, conversation_id, viewer_sender])?;
            }
            Ok(changed)
        })
    }

    /// Overwrites the text and sets `edited`. Returns false if no such message.
    pub fn edit_message(&self, conversation_id: &str, id: i64, text: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET text = ?3, edited = 1 WHERE id = ?1 AND conversation_id = ?2",
                rusqlite::params![id, conversation_id, text],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Reactions --

    /// One reaction per reactor: a repeat reaction replaces the previous emoji.
    pub fn set_reaction(&self, message_id: i64, reactor_id: &str, emoji: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reactions (message_id, reactor_id, emoji) VALUES (?1, ?2, ?3)
                 ON CONFLICT (message_id, reactor_id) DO UPDATE SET emoji = excluded.emoji",
                rusqlite::params![message_id, reactor_id, emoji],
            )?;
            Ok(())
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn get_reactions_for_messages(&self, message_ids: &[i64]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, reactor_id, emoji FROM reactions WHERE message_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(message_ids.iter()), |row| {
                    Ok(ReactionRow {
                        message_id: row.get(0)?,
                        reactor_id: row.get(1)?,
                        emoji: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users WHERE {} = ?1",
        USER_COLUMNS, column
    ))?;

    stmt.query_row([value], user_from_row).optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        online: row.get(4)?,
        last_seen: row.get(5)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        author_id: row.get(2)?,
        sender: row.get(3)?,
        text: row.get(4)?,
        timestamp: row.get(5)?,
        seen: row.get(6)?,
        edited: row.get(7)?,
    })
}

/// True when `err` came from a UNIQUE or PRIMARY KEY violation, such as a
/// second account for one email.
pub fn is_constraint_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
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
    use super::*;

    const CONV: &str = "conv-1";

    #[test]
    fn duplicate_email_is_a_constraint_violation() {
        let (db, _) = db_with_user();
        let other = uuid::Uuid::new_v4().to_string();
        let err = db
            .create_user(&other, "Ada again", "ada@example.com", "hash", 2_000)
            .unwrap_err();
        assert!(is_constraint_violation(&err));
        assert!(!is_constraint_violation(&anyhow::anyhow!("disk on fire")));
    }

    fn db_with_user() -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        db.create_user(&id, "Ada", "ada@example.com", "hash", 1_000).unwrap();
        (db, id)
    }

    #[test]
    fn created_user_starts_online() {
        let (db, id) = db_with_user();
        let user = db.get_user_by_email("ada@example.com").unwrap().unwrap();
        assert_eq!(user.id, id);
        assert!(user.online);
        assert_eq!(user.last_seen, Some(1_000));
        assert!(db.get_user_by_email("nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let (db, _) = db_with_user();
        let other = uuid::Uuid::new_v4().to_string();
        assert!(db.create_user(&other, "Eve", "ada@example.com", "hash", 0).is_err());
    }

    #[test]
    fn presence_reports_change_only_once() {
        let (db, id) = db_with_user();
        assert!(db.set_presence(&id, false, 2_000).unwrap());
        assert!(!db.set_presence(&id, false, 2_000).unwrap());
        let user = db.get_user_by_id(&id).unwrap().unwrap();
        assert!(!user.online);
        assert_eq!(user.last_seen, Some(2_000));
    }

    #[test]
    fn message_ids_follow_insertion_order() {
        let (db, id) = db_with_user();
        let a = db.insert_message(CONV, &id, "user", "first", 10).unwrap();
        let b = db.insert_message(CONV, &id, "user", "second", 5).unwrap();
        assert!(b > a);
        let texts: Vec<_> = db.get_messages(CONV).unwrap().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert!(db.get_messages("other").unwrap().is_empty());
    }

    #[test]
    fn mark_seen_skips_own_and_already_seen() {
        let (db, id) = db_with_user();
        let from_user = db.insert_message(CONV, &id, "user", "hi", 1).unwrap();
        let from_admin = db.insert_message(CONV, &id, "admin", "hello", 2).unwrap();

        // the admin views: only the user's message flips
        assert_eq!(db.mark_seen(CONV, &[from_user, from_admin], "admin").unwrap(), 1);
        assert_eq!(db.mark_seen(CONV, &[from_user], "admin").unwrap(), 0);

        let rows = db.get_messages(CONV).unwrap();
        assert!(rows[0].seen);
        assert!(!rows[1].seen);
    }

    #[test]
    fn edit_overwrites_text() {
        let (db, id) = db_with_user();
        let mid = db.insert_message(CONV, &id, "admin", "hi", 1).unwrap();
        assert!(db.edit_message(CONV, mid, "hi there").unwrap());
        assert!(!db.edit_message(CONV, mid + 100, "nope").unwrap());
        let row = db.get_message(CONV, mid).unwrap().unwrap();
        assert_eq!(row.text, "hi there");
        assert!(row.edited);
    }

    #[test]
    fn reaction_is_replaced_not_added() {
        let (db, id) = db_with_user();
        let mid = db.insert_message(CONV, &id, "user", "hi", 1).unwrap();
        db.set_reaction(mid, &id, "👍").unwrap();
        db.set_reaction(mid, &id, "😂").unwrap();
        let reactions = db.get_reactions_for_messages(&[mid]).unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].emoji, "😂");
        assert!(db.get_reactions_for_messages(&[]).unwrap().is_empty());
    }
}
