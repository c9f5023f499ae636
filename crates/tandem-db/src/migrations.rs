use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            online      INTEGER NOT NULL DEFAULT 0,
            last_seen   INTEGER,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id TEXT NOT NULL,
            author_id       TEXT NOT NULL REFERENCES users(id),
            sender          TEXT NOT NULL CHECK (sender IN ('user', 'admin')),
            text            TEXT NOT NULL,
            timestamp       INTEGER NOT NULL,
            seen            INTEGER NOT NULL DEFAULT 0,
            edited          INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, id);

        CREATE TABLE IF NOT EXISTS reactions (
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            reactor_id  TEXT NOT NULL,
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (message_id, reactor_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
