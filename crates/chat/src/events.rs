use rill_llm::EndpointVariant;

use crate::lifecycle::RequestLifecycle;
use crate::message::{ChatMessage, ConversationId, StreamTarget, Transcript};

/// A stream line that could not be used, reported instead of failing the turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub target: StreamTarget,
    pub line: String,
    pub reason: String,
}

/// Read-only view of one conversation, published after every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSnapshot {
    pub conversation_id: ConversationId,
    pub variant: EndpointVariant,
    pub transcript: Transcript,
    pub lifecycle: RequestLifecycle,
}

impl ConversationSnapshot {
    pub fn new(conversation_id: ConversationId, variant: EndpointVariant) -> Self {
        Self {
            conversation_id,
            variant,
            transcript: Transcript::new(),
            lifecycle: RequestLifecycle::Idle,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.transcript.messages()
    }

    pub fn is_pending(&self) -> bool {
        self.lifecycle.is_pending()
    }
}
