use std::collections::{BTreeMap, HashMap};

use async_stream::stream;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use tandem_db::models::{MessageRow, ReactionRow};
use tandem_types::models::{ConversationId, Message, MessageId, REACTION_EMOJIS, Sender};

use crate::error::SyncError;
use crate::tree::{Tree, TreePath, from_millis, next_change, to_millis};

impl Tree {
    /// Current messages of a conversation in insertion order. An absent
    /// conversation is an empty list.
    pub async fn messages(&self, conversation: ConversationId) -> Result<Vec<Message>, SyncError> {
        let key = conversation.to_string();
        let (rows, reactions) = self
            .blocking(move |db| {
                let rows = db.get_messages(&key)?;
                let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
                let reactions = db.get_reactions_for_messages(&ids)?;
                Ok((rows, reactions))
            })
            .await?;

        Ok(assemble(conversation, rows, reactions))
    }

    async fn message(&self, conversation: ConversationId, id: MessageId) -> Result<Message, SyncError> {
        let key = conversation.to_string();
        let (row, reactions) = self
            .blocking(move |db| {
                let Some(row) = db.get_message(&key, id)? else {
                    return Ok((None, vec![]));
                };
                let reactions = db.get_reactions_for_messages(&[id])?;
                Ok((Some(row), reactions))
            })
            .await?;

        let row = row.ok_or_else(|| SyncError::NotFound(format!("message {}", id)))?;
        assemble(conversation, vec![row], reactions)
            .pop()
            .ok_or_else(|| SyncError::NotFound(format!("message {}", id)))
    }

    /// Append a message. Blank text is ignored and yields `None`.
    pub async fn send_message(
        &self,
        conversation: ConversationId,
        author_id: Uuid,
        sender: Sender,
        text: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<Message>, SyncError> {
        if text.trim().is_empty() {
            debug!("Ignoring blank message from {}", author_id);
            return Ok(None);
        }
        if !conversation.contains(author_id) {
            return Err(SyncError::Forbidden(format!(
                "{} is not part of conversation {}",
                author_id, conversation
            )));
        }

        let key = conversation.to_string();
        let body = text.to_string();
        let at = to_millis(timestamp);
        let id = self
            .blocking(move |db| {
                db.insert_message(&key, &author_id.to_string(), sender.as_str(), &body, at)
            })
            .await?;

        self.publish(TreePath::Conversation(conversation));

        Ok(Some(Message {
            id,
            conversation,
            author_id,
            text: text.to_string(),
            sender,
            timestamp: from_millis(at),
            seen: false,
            edited: false,
            reactions: BTreeMap::new(),
        }))
    }

    /// Replace the text of a message written by `editor_id`. Blank text is
    /// ignored and yields `None`. The previous text is not kept.
    pub async fn edit_message(
        &self,
        conversation: ConversationId,
        id: MessageId,
        editor_id: Uuid,
        text: &str,
    ) -> Result<Option<Message>, SyncError> {
        if text.trim().is_empty() {
            debug!("Ignoring blank edit of message {}", id);
            return Ok(None);
        }

        let current = self.message(conversation, id).await?;
        if current.author_id != editor_id {
            warn!("{} tried to edit message {} by {}", editor_id, id, current.author_id);
            return Err(SyncError::Forbidden("only the author can edit a message".into()));
        }

        let key = conversation.to_string();
        let body = text.to_string();
        let updated = self.blocking(move |db| db.edit_message(&key, id, &body)).await?;
        if !updated {
            return Err(SyncError::NotFound(format!("message {}", id)));
        }

        self.publish(TreePath::Conversation(conversation));
        self.message(conversation, id).await.map(Some)
    }

    /// Set `reactor_id`'s reaction on a message, replacing any earlier one.
    pub async fn react(
        &self,
        conversation: ConversationId,
        id: MessageId,
        reactor_id: Uuid,
        emoji: &str,
    ) -> Result<Message, SyncError> {
        if !REACTION_EMOJIS.contains(&emoji) {
            return Err(SyncError::Validation(format!("unsupported reaction '{}'", emoji)));
        }
        if !conversation.contains(reactor_id) {
            return Err(SyncError::Forbidden(format!(
                "{} is not part of conversation {}",
                reactor_id, conversation
            )));
        }

        // existence check, scoped to this conversation
        self.message(conversation, id).await?;

        let reactor = reactor_id.to_string();
        let emoji = emoji.to_string();
        self.blocking(move |db| db.set_reaction(id, &reactor, &emoji)).await?;

        self.publish(TreePath::Conversation(conversation));
        self.message(conversation, id).await
    }

    /// Flip `seen` on counterpart messages among `ids`. Messages written by
    /// `viewer` and messages already seen are left alone, so repeating the
    /// call is harmless. Only publishes when something changed.
    pub async fn mark_seen(
        &self,
        conversation: ConversationId,
        viewer: Sender,
        ids: Vec<MessageId>,
    ) -> Result<usize, SyncError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let key = conversation.to_string();
        let changed = self
            .blocking(move |db| db.mark_seen(&key, &ids, viewer.as_str()))
            .await?;
        if changed > 0 {
            trace!("{} marked {} message(s) seen in {}", viewer, changed, conversation);
            self.publish(TreePath::Conversation(conversation));
        }
        Ok(changed)
    }

    /// Full snapshots of a conversation: the current one, then one after every
    /// change. Nothing is read until the stream is first polled, and dropping
    /// it ends the subscription.
    pub fn watch_messages(
        &self,
        conversation: ConversationId,
    ) -> impl Stream<Item = Result<Vec<Message>, SyncError>> + Send + 'static {
        let tree = self.clone();
        let path = TreePath::Conversation(conversation);
        stream! {
            let mut rx = tree.subscribe();
            loop {
                yield tree.messages(conversation).await;
                if next_change(&mut rx, |p| *p == path).await.is_none() {
                    break;
                }
            }
        }
    }

    /// The conversation as seen by `viewer`: like [`Tree::watch_messages`],
    /// and every snapshot holding unseen counterpart messages triggers a
    /// background seen-write.
    pub fn open_conversation(
        &self,
        conversation: ConversationId,
        viewer: Sender,
    ) -> impl Stream<Item = Result<Vec<Message>, SyncError>> + Send + 'static {
        let tree = self.clone();
        self.watch_messages(conversation).map(move |snapshot| {
            if let Ok(messages) = &snapshot {
                let unseen: Vec<MessageId> = messages
                    .iter()
                    .filter(|m| m.sender != viewer && !m.seen)
                    .map(|m| m.id)
                    .collect();

                if !unseen.is_empty() {
                    let tree = tree.clone();
                    tokio::spawn(async move {
                        if let Err(e) = tree.mark_seen(conversation, viewer, unseen).await {
                            warn!("Failed to mark messages seen in {}: {}", conversation, e);
                        }
                    });
                }
            }
            snapshot
        })
    }
}

fn assemble(conversation: ConversationId, rows: Vec<MessageRow>, reactions: Vec<ReactionRow>) -> Vec<Message> {
    let mut by_message: HashMap<i64, BTreeMap<Uuid, String>> = HashMap::new();
    for r in reactions {
        match r.reactor_id.parse::<Uuid>() {
            Ok(reactor) => {
                by_message.entry(r.message_id).or_default().insert(reactor, r.emoji);
            }
            Err(e) => warn!("Corrupt reactor_id '{}' on message {}: {}", r.reactor_id, r.message_id, e),
        }
    }

    rows.into_iter()
        .filter_map(|row| {
            let author_id = row
                .author_id
                .parse::<Uuid>()
                .map_err(|e| warn!("Corrupt author_id '{}' on message {}: {}", row.author_id, row.id, e))
                .ok()?;
            let sender = row
                .sender
                .parse::<Sender>()
                .map_err(|e| warn!("Corrupt sender on message {}: {}", row.id, e))
                .ok()?;

            Some(Message {
                id: row.id,
                conversation,
                author_id,
                text: row.text,
                sender,
                timestamp: from_millis(row.timestamp),
                seen: row.seen,
                edited: row.edited,
                reactions: by_message.remove(&row.id).unwrap_or_default(),
            })
        })
        .collect()
}
