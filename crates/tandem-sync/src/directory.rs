use std::collections::HashSet;

use async_stream::stream;
use futures_util::stream::{BoxStream, SelectAll};
use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

use tandem_types::models::{ConversationId, DirectoryEntry, Message, Sender, UserRecord};

use crate::error::SyncError;
use crate::tree::Tree;
use crate::unread::ConversationSummary;

type ConversationFeed = BoxStream<'static, (Uuid, Result<Vec<Message>, SyncError>)>;

enum Step {
    Users(Result<Vec<UserRecord>, SyncError>),
    Conversation(Uuid, Result<Vec<Message>, SyncError>),
}

impl Tree {
    /// One-off read of the admin's conversation picker.
    pub async fn directory(&self, admin_id: Uuid) -> Result<Vec<DirectoryEntry>, SyncError> {
        let users = self.users().await?;
        let mut entries = Vec::with_capacity(users.len());
        for user in users.iter().filter(|user| user.uid != admin_id) {
            let messages = self.messages(ConversationId::between(user.uid, admin_id)).await?;
            let summary = ConversationSummary::of(&messages, Sender::Admin);
            let mut entry = DirectoryEntry::from(user);
            entry.unread = summary.unread;
            entry.last_message = summary.last_message;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// The admin's conversation picker, re-yielded in full whenever the user
    /// set or any user's conversation changes.
    ///
    /// One subscription to the user set fans out into one conversation
    /// subscription per user. Each of them triggers its own re-yield; there
    /// is no batching across simultaneous updates.
    pub fn watch_directory(
        &self,
        admin_id: Uuid,
    ) -> impl Stream<Item = Result<Vec<DirectoryEntry>, SyncError>> + Send + 'static {
        let tree = self.clone();
        stream! {
            let mut users = tree.watch_users().boxed();
            let mut conversations: SelectAll<ConversationFeed> = SelectAll::new();
            let mut watched: HashSet<Uuid> = HashSet::new();
            let mut entries: Vec<DirectoryEntry> = Vec::new();

            loop {
                let step = tokio::select! {
                    Some(snapshot) = users.next() => Step::Users(snapshot),
                    Some((uid, snapshot)) = conversations.next() => Step::Conversation(uid, snapshot),
                    else => break,
                };

                match step {
                    Step::Users(Err(e)) | Step::Conversation(_, Err(e)) => {
                        yield Err(e);
                    }

                    Step::Users(Ok(records)) => {
                        let mut next = Vec::with_capacity(records.len());
                        for user in records.iter().filter(|user| user.uid != admin_id) {
                            let mut entry = DirectoryEntry::from(user);

                            if watched.insert(user.uid) {
                                // count what is already there before the first yield
                                let uid = user.uid;
                                let conversation = ConversationId::between(uid, admin_id);
                                match tree.messages(conversation).await {
                                    Ok(messages) => {
                                        let summary = ConversationSummary::of(&messages, Sender::Admin);
                                        entry.unread = summary.unread;
                                        entry.last_message = summary.last_message;
                                    }
                                    Err(e) => warn!("Directory could not read conversation of {}: {}", uid, e),
                                }

                                debug!("Directory now following conversation of {}", uid);
                                conversations.push(
                                    tree.watch_messages(conversation)
                                        .map(move |snapshot| (uid, snapshot))
                                        .boxed(),
                                );
                            } else if let Some(old) = entries.iter().find(|e| e.uid == user.uid) {
                                // keep derived counts until the conversation re-reports
                                entry.unread = old.unread;
                                entry.last_message = old.last_message.clone();
                            }

                            next.push(entry);
                        }

                        entries = next;
                        yield Ok(entries.clone());
                    }

                    Step::Conversation(uid, Ok(messages)) => {
                        let summary = ConversationSummary::of(&messages, Sender::Admin);
                        if let Some(entry) = entries.iter_mut().find(|e| e.uid == uid) {
                            entry.unread = summary.unread;
                            entry.last_message = summary.last_message;
                        }
                        yield Ok(entries.clone());
                    }
                }
            }
        }
    }
}

/// Entries whose name contains `query`, ignoring case. An empty query keeps
/// everything.
pub fn filter_directory(entries: &[DirectoryEntry], query: &str) -> Vec<DirectoryEntry> {
    let needle = query.to_lowercase();
    entries
        .iter()
        .filter(|e| e.name.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tandem_db::Database;

    use super::*;

    fn entry(name: &str) -> DirectoryEntry {
        DirectoryEntry {
            uid: Uuid::new_v4(),
            name: name.into(),
            online: false,
            last_seen: None,
            unread: 0,
            last_message: String::new(),
            presence: "Offline".into(),
        }
    }

    #[test]
    fn search_ignores_case() {
        let entries = vec![entry("Ada Lovelace"), entry("Grace Hopper"), entry("ADAM")];
        let names: Vec<_> = filter_directory(&entries, "ada")
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["Ada Lovelace", "ADAM"]);
        assert_eq!(filter_directory(&entries, "").len(), 3);
    }

    #[tokio::test]
    async fn first_snapshot_counts_existing_messages() {
        let tree = Tree::new(Database::open_in_memory().unwrap(), "admin@example.com");
        let admin = tree.create_user("Boss", "admin@example.com", "h").await.unwrap();
        let ada = tree.create_user("Ada", "ada@example.com", "h").await.unwrap();
        let conversation = tree.conversation_for(ada.uid).await.unwrap();
        tree.send_message(conversation, ada.uid, Sender::User, "hello", Utc::now())
            .await
            .unwrap();

        let mut directory = Box::pin(tree.watch_directory(admin.uid));
        let first = directory.next().await.unwrap().unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].uid, ada.uid);
        assert_eq!(first[0].unread, 1);
        assert_eq!(first[0].last_message, "hello");
        assert_eq!(first[0].presence, "Online");
    }
}
