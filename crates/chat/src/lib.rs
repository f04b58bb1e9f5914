#![deny(unsafe_code)]

//! Conversation state for streamed chat answers.
//!
//! A [`ConversationController`] owns one transcript and drives one answer stream
//! at a time; a [`ChatSessionRegistry`] keeps several of them side by side.

/// Event application for the streaming answer.
pub mod accumulator;
pub mod controller;
pub mod error;
/// Diagnostics and published snapshots.
pub mod events;
/// Request lifecycle state machine.
pub mod lifecycle;
/// Domain entities and identifiers.
pub mod message;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use accumulator::{Progress, TranscriptAccumulator};
pub use controller::ConversationController;
pub use error::{ChatResult, SubmitError};
pub use events::{ConversationSnapshot, Diagnostic};
pub use lifecycle::{
    LifecycleRejection, LifecycleResult, LifecycleTransition, RequestLifecycle, TurnOutcome,
};
pub use message::{
    Author, ChatMessage, CompletionState, ConversationId, MessageId, StreamSessionId,
    StreamTarget, Transcript,
};
pub use registry::ChatSessionRegistry;
pub use rill_llm::EndpointVariant;
