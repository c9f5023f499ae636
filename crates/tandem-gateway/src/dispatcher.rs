use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tandem_sync::{SyncError, Tree};
use tandem_types::events::{GatewayEvent, SubscriptionTarget};
use tandem_types::models::Role;

/// Who sits behind an identified gateway connection.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
}

/// Tracks live gateway connections and turns subscriptions into tasks that
/// forward tree snapshots to a connection.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    tree: Tree,

    /// user_id -> ids of that user's open connections
    connections: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl Dispatcher {
    pub fn new(tree: Tree) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                tree,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.inner.tree
    }

    /// Register a connection. The first one marks the user online.
    pub async fn connect(&self, user_id: Uuid) -> Uuid {
        let conn_id = Uuid::new_v4();
        let first = {
            let mut connections = self.inner.connections.write().await;
            let open = connections.entry(user_id).or_default();
            open.insert(conn_id);
            open.len() == 1
        };

        if first {
            if let Err(e) = self.inner.tree.set_online(user_id).await {
                warn!("Failed to mark {} online: {}", user_id, e);
            }
        }
        conn_id
    }

    /// Drop a connection. The user goes offline only when their last one closes.
    pub async fn disconnect(&self, user_id: Uuid, conn_id: Uuid) {
        let last = {
            let mut connections = self.inner.connections.write().await;
            match connections.get_mut(&user_id) {
                Some(open) if open.contains(&conn_id) => {
                    open.remove(&conn_id);
                    if open.is_empty() {
                        connections.remove(&user_id);
                        true
                    } else {
                        false
                    }
                }
                _ => false,
            }
        };

        if last {
            if let Err(e) = self.inner.tree.set_offline(user_id).await {
                warn!("Failed to mark {} offline: {}", user_id, e);
            }
        }
    }

    /// Users with at least one open connection.
    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.connections.read().await.keys().copied().collect()
    }

    /// Start forwarding snapshots for `target` into `tx`. The returned task
    /// runs until aborted or until the connection's channel closes.
    pub async fn subscribe(
        &self,
        identity: &Identity,
        target: SubscriptionTarget,
        tx: mpsc::UnboundedSender<GatewayEvent>,
    ) -> Result<JoinHandle<()>, SyncError> {
        let tree = &self.inner.tree;

        let handle = match target {
            SubscriptionTarget::Conversation { user_id } => {
                let (conversation, viewer) = tree
                    .conversation_access(identity.user_id, &identity.email, user_id)
                    .await?;
                let snapshots = tree.open_conversation(conversation, viewer).map(move |snapshot| {
                    match snapshot {
                        Ok(messages) => GatewayEvent::ConversationSnapshot { user_id, messages },
                        Err(e) => GatewayEvent::Error { message: e.to_string() },
                    }
                });
                tokio::spawn(forward(snapshots, tx))
            }

            SubscriptionTarget::Typing { user_id } => {
                let (conversation, viewer) = tree
                    .conversation_access(identity.user_id, &identity.email, user_id)
                    .await?;
                // each side listens to the other side's flag
                let sender = viewer.counterpart();
                let flags = tree
                    .watch_typing(conversation, sender)
                    .map(move |typing| GatewayEvent::TypingUpdate { user_id, sender, typing });
                tokio::spawn(forward(flags, tx))
            }

            SubscriptionTarget::Directory => {
                if identity.role != Role::Admin {
                    return Err(SyncError::Forbidden("the directory is admin only".into()));
                }
                let snapshots = tree.watch_directory(identity.user_id).map(|snapshot| match snapshot {
                    Ok(users) => GatewayEvent::DirectorySnapshot { users },
                    Err(e) => GatewayEvent::Error { message: e.to_string() },
                });
                tokio::spawn(forward(snapshots, tx))
            }
        };

        info!("{} ({}) subscribed to {:?}", identity.name, identity.user_id, target);
        Ok(handle)
    }
}

async fn forward<S>(events: S, tx: mpsc::UnboundedSender<GatewayEvent>)
where
    S: Stream<Item = GatewayEvent> + Send + 'static,
{
    let mut events = Box::pin(events);
    while let Some(event) = events.next().await {
        if tx.send(event).is_err() {
            debug!("Subscriber channel closed");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tandem_db::Database;
    use tandem_types::models::Sender;

    use super::*;

    const ADMIN_EMAIL: &str = "admin@example.com";

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Tree::new(Database::open_in_memory().unwrap(), ADMIN_EMAIL))
    }

    fn identity(user_id: Uuid, email: &str, role: Role) -> Identity {
        Identity {
            user_id,
            email: email.into(),
            name: "someone".into(),
            role,
        }
    }

    #[tokio::test]
    async fn offline_only_after_last_connection() {
        let dispatcher = dispatcher();
        let tree = dispatcher.tree().clone();
        let ada = tree.create_user("Ada", "ada@example.com", "h").await.unwrap();
        tree.set_offline(ada.uid).await.unwrap();

        let first = dispatcher.connect(ada.uid).await;
        let second = dispatcher.connect(ada.uid).await;
        assert!(tree.user(ada.uid).await.unwrap().unwrap().online);

        dispatcher.disconnect(ada.uid, first).await;
        assert!(tree.user(ada.uid).await.unwrap().unwrap().online);

        // closing an unknown connection changes nothing
        dispatcher.disconnect(ada.uid, Uuid::new_v4()).await;
        assert_eq!(dispatcher.online_users().await, vec![ada.uid]);

        dispatcher.disconnect(ada.uid, second).await;
        assert!(!tree.user(ada.uid).await.unwrap().unwrap().online);
        assert!(dispatcher.online_users().await.is_empty());
    }

    #[tokio::test]
    async fn conversation_subscription_streams_snapshots() {
        let dispatcher = dispatcher();
        let tree = dispatcher.tree().clone();
        let admin = tree.create_user("Boss", ADMIN_EMAIL, "h").await.unwrap();
        let ada = tree.create_user("Ada", "ada@example.com", "h").await.unwrap();
        let conversation = tree.conversation_for(ada.uid).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = dispatcher
            .subscribe(
                &identity(ada.uid, "ada@example.com", Role::User),
                SubscriptionTarget::Conversation { user_id: ada.uid },
                tx,
            )
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            GatewayEvent::ConversationSnapshot { messages, .. } => assert!(messages.is_empty()),
            other => panic!("unexpected {:?}", other),
        }

        tree.send_message(conversation, admin.uid, Sender::Admin, "hi", Utc::now())
            .await
            .unwrap();
        let messages = loop {
            match rx.recv().await.unwrap() {
                GatewayEvent::ConversationSnapshot { messages, .. } if !messages.is_empty() => {
                    break messages;
                }
                _ => continue,
            }
        };
        assert_eq!(messages[0].text, "hi");

        task.abort();
    }

    #[tokio::test]
    async fn users_cannot_subscribe_outside_their_conversation() {
        let dispatcher = dispatcher();
        let tree = dispatcher.tree().clone();
        tree.create_user("Boss", ADMIN_EMAIL, "h").await.unwrap();
        let ada = tree.create_user("Ada", "ada@example.com", "h").await.unwrap();
        let grace = tree.create_user("Grace", "grace@example.com", "h").await.unwrap();
        let ada_identity = identity(ada.uid, "ada@example.com", Role::User);

        let (tx, _rx) = mpsc::unbounded_channel();
        let denied = dispatcher
            .subscribe(&ada_identity, SubscriptionTarget::Typing { user_id: grace.uid }, tx.clone())
            .await;
        assert!(matches!(denied, Err(SyncError::Forbidden(_))));

        let denied = dispatcher
            .subscribe(&ada_identity, SubscriptionTarget::Directory, tx)
            .await;
        assert!(matches!(denied, Err(SyncError::Forbidden(_))));
    }

    #[tokio::test]
    async fn typing_subscription_follows_the_other_side() {
        let dispatcher = dispatcher();
        let tree = dispatcher.tree().clone();
        let admin = tree.create_user("Boss", ADMIN_EMAIL, "h").await.unwrap();
        let ada = tree.create_user("Ada", "ada@example.com", "h").await.unwrap();
        let conversation = tree.conversation_for(ada.uid).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = dispatcher
            .subscribe(
                &identity(admin.uid, ADMIN_EMAIL, Role::Admin),
                SubscriptionTarget::Typing { user_id: ada.uid },
                tx,
            )
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            GatewayEvent::TypingUpdate { user_id, sender, typing } => {
                assert_eq!(user_id, ada.uid);
                assert_eq!(sender, Sender::User);
                assert!(!typing);
            }
            other => panic!("unexpected {:?}", other),
        }

        // the admin's own flag is not reported back to the admin
        tree.set_typing(conversation, Sender::Admin, true).await;
        tree.set_typing(conversation, Sender::User, true).await;
        match rx.recv().await.unwrap() {
            GatewayEvent::TypingUpdate { sender, typing, .. } => {
                assert_eq!(sender, Sender::User);
                assert!(typing);
            }
            other => panic!("unexpected {:?}", other),
        }

        task.abort();
    }

    #[tokio::test]
    async fn admin_directory_subscription_tracks_unread() {
        let dispatcher = dispatcher();
        let tree = dispatcher.tree().clone();
        let admin = tree.create_user("Boss", ADMIN_EMAIL, "h").await.unwrap();
        let ada = tree.create_user("Ada", "ada@example.com", "h").await.unwrap();
        let conversation = tree.conversation_for(ada.uid).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = dispatcher
            .subscribe(&identity(admin.uid, ADMIN_EMAIL, Role::Admin), SubscriptionTarget::Directory, tx)
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            GatewayEvent::DirectorySnapshot { users } => {
                assert_eq!(users.len(), 1);
                assert_eq!(users[0].uid, ada.uid);
                assert_eq!(users[0].unread, 0);
            }
            other => panic!("unexpected {:?}", other),
        }

        tree.send_message(conversation, ada.uid, Sender::User, "hello", Utc::now())
            .await
            .unwrap();
        let users = loop {
            match rx.recv().await.unwrap() {
                GatewayEvent::DirectorySnapshot { users } if users[0].unread == 1 => break users,
                GatewayEvent::DirectorySnapshot { .. } => continue,
                other => panic!("unexpected {:?}", other),
            }
        };
        assert_eq!(users[0].last_message, "hello");

        task.abort();
    }
}
