use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, warn};
use uuid::Uuid;

use tandem_db::Database;
use tandem_types::models::{ConversationId, Sender};

use crate::error::SyncError;

/// Capacity of the change channel. A subscriber that falls further behind
/// re-reads its snapshot instead of replaying the missed notifications.
const CHANGE_CAPACITY: usize = 1024;

/// Logical location in the realtime tree. Every write publishes the path it
/// touched; listeners filter on the paths they care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreePath {
    /// `users/{uid}`
    User(Uuid),
    /// `messages/{conversation}` including nested message fields and reactions
    Conversation(ConversationId),
    /// `typing/{conversation}/{sender}`
    Typing(ConversationId, Sender),
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(uid) => write!(f, "users/{}", uid),
            Self::Conversation(conversation) => write!(f, "messages/{}", conversation),
            Self::Typing(conversation, sender) => write!(f, "typing/{}/{}", conversation, sender),
        }
    }
}

/// Handle to the shared realtime tree. Cheap to clone.
#[derive(Clone)]
pub struct Tree {
    pub(crate) inner: Arc<TreeInner>,
}

pub(crate) struct TreeInner {
    pub(crate) db: Arc<Database>,

    /// Fan-out of change notifications to every listener
    changes: broadcast::Sender<TreePath>,

    /// Volatile typing flags: (conversation, direction) -> typing
    pub(crate) typing: RwLock<HashMap<(ConversationId, Sender), bool>>,

    /// The one identity routed to the admin screens
    admin_email: String,
}

impl Tree {
    pub fn new(db: Database, admin_email: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            inner: Arc::new(TreeInner {
                db: Arc::new(db),
                changes,
                typing: RwLock::new(HashMap::new()),
                admin_email: admin_email.into(),
            }),
        }
    }

    pub fn admin_email(&self) -> &str {
        &self.inner.admin_email
    }

    /// Subscribe to raw change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<TreePath> {
        self.inner.changes.subscribe()
    }

    /// Announce that `path` changed.
    pub fn publish(&self, path: TreePath) {
        debug!("tree change at {}", path);
        let _ = self.inner.changes.send(path);
    }

    /// Run a store operation off the async runtime.
    pub(crate) async fn blocking<F, T>(&self, f: F) -> Result<T, SyncError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.inner.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                SyncError::Network(anyhow::anyhow!("store task failed: {}", e))
            })?
            .map_err(|e| {
                error!("store error: {:#}", e);
                SyncError::Network(e)
            })
    }
}

/// Waits for the next change accepted by `matches`. A lagged receiver counts
/// as a change since the dropped notifications may have touched the path.
/// Returns `None` once the tree is gone.
pub(crate) async fn next_change(
    rx: &mut broadcast::Receiver<TreePath>,
    matches: impl Fn(&TreePath) -> bool,
) -> Option<()> {
    loop {
        match rx.recv().await {
            Ok(path) if matches(&path) => return Some(()),
            Ok(_) => continue,
            Err(RecvError::Lagged(n)) => {
                warn!("Tree listener lagged by {} changes, re-reading snapshot", n);
                return Some(());
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(|| {
        warn!("Timestamp {} out of range", ms);
        DateTime::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_render_like_tree_locations() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let conversation = ConversationId::between(a, b);
        assert_eq!(TreePath::User(a).to_string(), format!("users/{}", a));
        assert_eq!(
            TreePath::Typing(conversation, Sender::Admin).to_string(),
            format!("typing/{}/admin", conversation)
        );
    }

    #[tokio::test]
    async fn next_change_skips_unrelated_paths() {
        let tree = Tree::new(Database::open_in_memory().unwrap(), "admin@example.com");
        let mut rx = tree.subscribe();
        let wanted = TreePath::User(Uuid::new_v4());

        tree.publish(TreePath::User(Uuid::new_v4()));
        tree.publish(wanted);

        assert_eq!(next_change(&mut rx, |p| *p == wanted).await, Some(()));
        assert!(rx.is_empty());
    }

    #[test]
    fn millis_round_trip_keeps_precision() {
        let now = Utc::now();
        assert_eq!(to_millis(from_millis(to_millis(now))), to_millis(now));
    }
}
