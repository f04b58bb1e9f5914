use std::fmt;

use uuid::Uuid;

/// Stable identifier for one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(pub u64);

impl ConversationId {
    /// Creates a typed conversation identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "conversation-{}", self.0)
    }
}

/// Identifier for one submission of a conversation.
///
/// This must change on every submit so events of an abandoned turn can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamSessionId(pub u64);

impl StreamSessionId {
    /// Creates a typed stream session identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Stream routing key used for stale-event rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub conversation_id: ConversationId,
    pub session_id: StreamSessionId,
}

impl StreamTarget {
    /// Builds a full stream target from conversation and session IDs.
    pub const fn new(conversation_id: ConversationId, session_id: StreamSessionId) -> Self {
        Self {
            conversation_id,
            session_id,
        }
    }
}

/// Opaque message identifier, unique across conversations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new_v7() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Author {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionState {
    Streaming,
    Complete,
}

/// One transcript entry.
///
/// Content only grows and completion never reverts; both are enforced by keeping
/// the mutators crate-private and routing them through the accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    id: MessageId,
    author: Author,
    content: String,
    completion: CompletionState,
}

impl ChatMessage {
    /// A user question, complete from the start.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Author::User, content.into(), CompletionState::Complete)
    }

    /// An empty assistant answer waiting for fragments.
    pub fn assistant_streaming() -> Self {
        Self::new(Author::Assistant, String::new(), CompletionState::Streaming)
    }

    /// A finished assistant message carrying locally generated text, such as a
    /// failure notice.
    pub fn assistant_notice(content: impl Into<String>) -> Self {
        Self::new(Author::Assistant, content.into(), CompletionState::Complete)
    }

    fn new(author: Author, content: String, completion: CompletionState) -> Self {
        Self {
            id: MessageId::new_v7(),
            author,
            content,
            completion,
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn author(&self) -> Author {
        self.author
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn completion(&self) -> CompletionState {
        self.completion
    }

    pub fn is_streaming(&self) -> bool {
        self.completion == CompletionState::Streaming
    }

    pub(crate) fn push_fragment(&mut self, fragment: &str) -> bool {
        if fragment.is_empty() || !self.is_streaming() {
            return false;
        }
        self.content.push_str(fragment);
        true
    }

    pub(crate) fn complete(&mut self) -> bool {
        if !self.is_streaming() {
            return false;
        }
        self.completion = CompletionState::Complete;
        true
    }
}

/// Append-only, chronologically ordered list of messages.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) -> MessageId {
        let id = message.id();
        self.messages.push(message);
        id
    }

    pub fn get(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|message| message.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: MessageId) -> Option<&mut ChatMessage> {
        // The message being streamed is almost always the last one.
        self.messages.iter_mut().rev().find(|message| message.id == id)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn streaming_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|message| message.is_streaming())
            .count()
    }
}
