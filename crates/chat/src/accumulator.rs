use rill_llm::StreamEvent;

use crate::message::{MessageId, Transcript};

/// What applying one event did to the target message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub changed: bool,
    pub terminal: bool,
}

/// Applies stream events to the one assistant message of the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscriptAccumulator {
    message_id: MessageId,
}

impl TranscriptAccumulator {
    pub fn new(message_id: MessageId) -> Self {
        Self { message_id }
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Appends text; a no-op once the message is complete.
    pub fn append_fragment(&self, transcript: &mut Transcript, fragment: &str) -> bool {
        transcript
            .get_mut(self.message_id)
            .is_some_and(|message| message.push_fragment(fragment))
    }

    /// Streaming -> Complete. Returns false if it was already complete.
    pub fn mark_complete(&self, transcript: &mut Transcript) -> bool {
        transcript
            .get_mut(self.message_id)
            .is_some_and(|message| message.complete())
    }

    /// Applies the fragment, then the terminal signal.
    pub fn apply(&self, transcript: &mut Transcript, event: &StreamEvent) -> Progress {
        let mut progress = Progress::default();

        if let Some(fragment) = &event.fragment {
            progress.changed |= self.append_fragment(transcript, fragment);
        }

        if event.done {
            progress.changed |= self.mark_complete(transcript);
            progress.terminal = true;
        }

        progress
    }
}
