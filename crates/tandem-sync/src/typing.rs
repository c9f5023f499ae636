use std::time::Duration;

use async_stream::stream;
use futures_util::Stream;
use tokio::task::JoinHandle;
use tracing::trace;

use tandem_types::models::{ConversationId, Sender};

use crate::tree::{Tree, TreePath, next_change};

/// How long a typing flag stays up after the keystroke that raised it.
pub const TYPING_CLEAR_AFTER: Duration = Duration::from_secs(1);

impl Tree {
    /// Set one direction's typing flag. Publishes only on an actual change.
    pub async fn set_typing(&self, conversation: ConversationId, sender: Sender, typing: bool) {
        let previous = self
            .inner
            .typing
            .write()
            .await
            .insert((conversation, sender), typing)
            .unwrap_or(false);

        if previous != typing {
            trace!("{} typing={} in {}", sender, typing, conversation);
            self.publish(TreePath::Typing(conversation, sender));
        }
    }

    pub async fn is_typing(&self, conversation: ConversationId, sender: Sender) -> bool {
        self.inner
            .typing
            .read()
            .await
            .get(&(conversation, sender))
            .copied()
            .unwrap_or(false)
    }

    /// The flag of one direction, now and after every change.
    pub fn watch_typing(
        &self,
        conversation: ConversationId,
        sender: Sender,
    ) -> impl Stream<Item = bool> + Send + 'static {
        let tree = self.clone();
        let path = TreePath::Typing(conversation, sender);
        stream! {
            let mut rx = tree.subscribe();
            loop {
                yield tree.is_typing(conversation, sender).await;
                if next_change(&mut rx, |p| *p == path).await.is_none() {
                    break;
                }
            }
        }
    }

    pub fn typing_signal(&self, conversation: ConversationId, sender: Sender) -> TypingSignal {
        TypingSignal::new(self.clone(), conversation, sender)
    }
}

/// Composer-side handle raising the typing flag of one direction.
///
/// Every keystroke raises the flag and schedules its own clear. Timers are
/// not coalesced: a clear scheduled by an early keystroke still fires during
/// a slow burst, so the flag can drop briefly mid-typing.
#[derive(Clone)]
pub struct TypingSignal {
    tree: Tree,
    conversation: ConversationId,
    sender: Sender,
}

impl TypingSignal {
    pub fn new(tree: Tree, conversation: ConversationId, sender: Sender) -> Self {
        Self {
            tree,
            conversation,
            sender,
        }
    }

    /// Raise the flag now and clear it after the delay. The returned handle
    /// resolves once the clear has been written.
    pub async fn keystroke(&self) -> JoinHandle<()> {
        self.tree.set_typing(self.conversation, self.sender, true).await;

        let tree = self.tree.clone();
        let (conversation, sender) = (self.conversation, self.sender);
        tokio::spawn(async move {
            tokio::time::sleep(TYPING_CLEAR_AFTER).await;
            tree.set_typing(conversation, sender, false).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use tandem_db::Database;
    use uuid::Uuid;

    use super::*;

    fn setup() -> (Tree, ConversationId) {
        let tree = Tree::new(Database::open_in_memory().unwrap(), "admin@example.com");
        (tree, ConversationId::between(Uuid::new_v4(), Uuid::new_v4()))
    }

    #[tokio::test(start_paused = true)]
    async fn flag_clears_after_timeout() {
        let (tree, conversation) = setup();
        let signal = tree.typing_signal(conversation, Sender::User);

        let clear = signal.keystroke().await;
        assert!(tree.is_typing(conversation, Sender::User).await);
        assert!(!tree.is_typing(conversation, Sender::Admin).await);

        tokio::time::sleep(TYPING_CLEAR_AFTER / 2).await;
        assert!(tree.is_typing(conversation, Sender::User).await);

        clear.await.unwrap();
        assert!(!tree.is_typing(conversation, Sender::User).await);
    }

    #[tokio::test(start_paused = true)]
    async fn early_timer_drops_flag_mid_burst() {
        let (tree, conversation) = setup();
        let signal = tree.typing_signal(conversation, Sender::Admin);

        let first = signal.keystroke().await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        let second = signal.keystroke().await;

        // the first keystroke's timer fires 400ms into the second one's window
        first.await.unwrap();
        assert!(!tree.is_typing(conversation, Sender::Admin).await);

        second.await.unwrap();
        assert!(!tree.is_typing(conversation, Sender::Admin).await);
    }

    #[tokio::test(start_paused = true)]
    async fn watchers_see_rise_and_fall() {
        let (tree, conversation) = setup();
        let mut flags = Box::pin(tree.watch_typing(conversation, Sender::User));
        assert_eq!(flags.next().await, Some(false));

        let clear = tree.typing_signal(conversation, Sender::User).keystroke().await;
        assert_eq!(flags.next().await, Some(true));

        clear.await.unwrap();
        assert_eq!(flags.next().await, Some(false));
    }
}
