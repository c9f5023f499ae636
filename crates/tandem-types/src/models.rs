use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Store-assigned message id. Ids only grow, so ordering by id is insertion order.
pub type MessageId = i64;

/// The fixed set of emojis a message can be reacted with.
pub const REACTION_EMOJIS: [&str; 6] = ["👍", "❤️", "😂", "😮", "😢", "👏"];

/// Display name used when a user record carries no name.
pub const UNKNOWN_USER_NAME: &str = "Unknown User";

/// Which side of a conversation authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Admin,
}

impl Sender {
    /// The other side of the conversation.
    pub fn counterpart(self) -> Self {
        match self {
            Self::User => Self::Admin,
            Self::Admin => Self::User,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown sender '{}'", other)),
        }
    }
}

/// Identity of a conversation: the two participant ids in canonical order,
/// so `between(a, b) == between(b, a)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId {
    low: Uuid,
    high: Uuid,
}

impl ConversationId {
    pub fn between(a: Uuid, b: Uuid) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.low == id || self.high == id
    }

    /// The participant that is not `id`, if `id` takes part at all.
    pub fn other(&self, id: Uuid) -> Option<Uuid> {
        if self.low == id {
            Some(self.high)
        } else if self.high == id {
            Some(self.low)
        } else {
            None
        }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.low, self.high)
    }
}

impl FromStr for ConversationId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (a, b) = s
            .split_once(':')
            .ok_or_else(|| format!("malformed conversation id '{}'", s))?;
        let a: Uuid = a.parse().map_err(|e| format!("bad participant '{}': {}", a, e))?;
        let b: Uuid = b.parse().map_err(|e| format!("bad participant '{}': {}", b, e))?;
        Ok(Self::between(a, b))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub uid: Uuid,
    pub name: String,
    pub email: String,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            UNKNOWN_USER_NAME
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation: ConversationId,
    pub author_id: Uuid,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    pub seen: bool,
    pub edited: bool,
    /// reactor id -> emoji; at most one entry per reactor.
    pub reactions: BTreeMap<Uuid, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingFlag {
    pub typing: bool,
}

/// One row of the admin's conversation picker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub uid: Uuid,
    pub name: String,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub unread: usize,
    pub last_message: String,
    /// Presence line rendered from `online` and `last_seen`.
    pub presence: String,
}

impl From<&UserRecord> for DirectoryEntry {
    fn from(user: &UserRecord) -> Self {
        Self {
            uid: user.uid,
            name: user.display_name().to_string(),
            online: user.online,
            last_seen: user.last_seen,
            unread: 0,
            last_message: String::new(),
            presence: PresenceLabel::of(user.online, user.last_seen).to_string(),
        }
    }
}

/// Presence line shown under a user in the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceLabel {
    Online,
    LastSeen(DateTime<Utc>),
    Offline,
}

impl PresenceLabel {
    pub fn of(online: bool, last_seen: Option<DateTime<Utc>>) -> Self {
        match (online, last_seen) {
            (true, _) => Self::Online,
            (false, Some(at)) => Self::LastSeen(at),
            (false, None) => Self::Offline,
        }
    }
}

impl fmt::Display for PresenceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => f.write_str("Online"),
            Self::LastSeen(at) => write!(f, "Last seen {}", at.format("%Y-%m-%d %H:%M")),
            Self::Offline => f.write_str("Offline"),
        }
    }
}

/// Access class of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Anonymous,
    User,
    Admin,
}

impl Role {
    /// The conversation side this role writes as. Anonymous has none.
    pub fn sender(self) -> Option<Sender> {
        match self {
            Self::Anonymous => None,
            Self::User => Some(Sender::User),
            Self::Admin => Some(Sender::Admin),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    Login,
    CreateAccount,
    ForgotPassword,
    ChatRoom,
    ChatList,
    AdminChatRoom,
}

impl Screen {
    /// Screens reachable without signing in.
    pub fn is_public(self) -> bool {
        matches!(self, Self::Login | Self::CreateAccount | Self::ForgotPassword)
    }
}
