//! Tandem Sync: the realtime tree and the chat state derived from it.
//!
//! Writes go through [`Tree`], which persists them and publishes a change
//! notification. Listeners re-read a full snapshot on every relevant change:
//! - conversation listener with seen marking
//! - typing signal with self-clearing flag
//! - admin directory with per-user unread counts and previews
//! - role classification and screen routing

pub mod conversation;
pub mod directory;
pub mod error;
pub mod role;
pub mod tree;
pub mod typing;
pub mod unread;
pub mod users;

// Re-export key types for convenience.
pub use directory::filter_directory;
pub use error::SyncError;
pub use role::{classify, route};
pub use tree::{Tree, TreePath};
pub use typing::{TYPING_CLEAR_AFTER, TypingSignal};
pub use unread::{ConversationSummary, unread_count};
