use tandem_types::models::{Message, Sender};

/// Messages written by the viewer's counterpart that the viewer has not seen.
pub fn unread_count(messages: &[Message], viewer: Sender) -> usize {
    let counterpart = viewer.counterpart();
    messages
        .iter()
        .filter(|m| m.sender == counterpart && !m.seen)
        .count()
}

/// Derived per-conversation state shown next to a conversation in a list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationSummary {
    pub unread: usize,
    /// Text of the newest message, empty when there is none.
    pub last_message: String,
}

impl ConversationSummary {
    pub fn of(messages: &[Message], viewer: Sender) -> Self {
        Self {
            unread: unread_count(messages, viewer),
            last_message: messages.last().map(|m| m.text.clone()).unwrap_or_default(),
        }
    }
}
