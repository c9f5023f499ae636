/// Database row types. These map directly to SQLite rows.
/// Distinct from tandem-types models to keep the DB layer independent.
/// Timestamps are unix milliseconds.

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub online: bool,
    pub last_seen: Option<i64>,
}

pub struct MessageRow {
    pub id: i64,
    pub conversation_id: String,
    pub author_id: String,
    pub sender: String,
    pub text: String,
    pub timestamp: i64,
    pub seen: bool,
    pub edited: bool,
}

pub struct ReactionRow {
    pub message_id: i64,
    pub reactor_id: String,
    pub emoji: String,
}
