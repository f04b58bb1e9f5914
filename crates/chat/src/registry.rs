use std::collections::BTreeMap;
use std::sync::Arc;

use rill_llm::{ChatTransport, EndpointVariant};
use snafu::OptionExt;
use tokio::sync::mpsc;

use crate::controller::ConversationController;
use crate::error::{ChatResult, UnknownConversationSnafu};
use crate::events::Diagnostic;
use crate::message::{ConversationId, StreamTarget};

/// Owns one controller per chat widget.
///
/// Controllers share the transport but nothing mutable; closing a conversation
/// drops its controller, which cancels any in-flight turn.
pub struct ChatSessionRegistry {
    transport: Arc<dyn ChatTransport>,
    next_conversation_id: u64,
    controllers: BTreeMap<ConversationId, ConversationController>,
    diagnostics: Option<mpsc::UnboundedSender<Diagnostic>>,
}

impl ChatSessionRegistry {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport,
            next_conversation_id: 1,
            controllers: BTreeMap::new(),
            diagnostics: None,
        }
    }

    /// Every conversation opened afterwards reports to `sink`.
    pub fn with_diagnostics(mut self, sink: mpsc::UnboundedSender<Diagnostic>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    pub fn open(&mut self, variant: EndpointVariant) -> ConversationId {
        let id = ConversationId::new(self.next_conversation_id);
        self.next_conversation_id = self.next_conversation_id.saturating_add(1);

        let mut controller =
            ConversationController::new(id, variant, Arc::clone(&self.transport));
        if let Some(sink) = &self.diagnostics {
            controller = controller.with_diagnostics(sink.clone());
        }

        tracing::debug!(conversation_id = %id, %variant, "conversation opened");
        self.controllers.insert(id, controller);
        id
    }

    pub fn get(&self, id: ConversationId) -> Option<&ConversationController> {
        self.controllers.get(&id)
    }

    /// First open conversation bound to `variant`.
    pub fn find_by_variant(&self, variant: EndpointVariant) -> Option<&ConversationController> {
        self.controllers
            .values()
            .find(|controller| controller.variant() == variant)
    }

    pub fn submit(&self, id: ConversationId, question: &str) -> ChatResult<StreamTarget> {
        let controller = self.get(id).context(UnknownConversationSnafu {
            stage: "registry-submit",
            conversation_id: id,
        })?;
        controller.submit(question)
    }

    pub fn cancel(&self, id: ConversationId) -> bool {
        self.get(id).is_some_and(ConversationController::cancel)
    }

    /// Drops the conversation, abandoning its in-flight turn.
    pub fn close(&mut self, id: ConversationId) -> bool {
        let closed = self.controllers.remove(&id).is_some();
        if closed {
            tracing::debug!(conversation_id = %id, "conversation closed");
        }
        closed
    }

    pub fn conversations(&self) -> impl Iterator<Item = &ConversationController> {
        self.controllers.values()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}
