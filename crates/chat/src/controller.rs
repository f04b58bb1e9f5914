//! One conversation bound to one endpoint variant.
//!
//! `submit` records the question and spawns a turn task that opens the answer
//! stream, decodes it line by line and applies each event to the transcript. The
//! state lives behind a mutex shared only between the controller and its own turn
//! task; every mutation publishes a fresh [`ConversationSnapshot`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use rill_llm::{ChatTransport, EndpointVariant, TransportError, decode_lines, parse_line};
use snafu::ensure;
use tokio::sync::{mpsc, oneshot, watch};

use crate::accumulator::TranscriptAccumulator;
use crate::error::{AlreadyPendingSnafu, ChatResult, EmptyQuestionSnafu};
use crate::events::{ConversationSnapshot, Diagnostic};
use crate::lifecycle::{LifecycleTransition, RequestLifecycle, TurnOutcome};
use crate::message::{ChatMessage, ConversationId, StreamSessionId, StreamTarget, Transcript};

pub struct ConversationController {
    id: ConversationId,
    variant: EndpointVariant,
    transport: Arc<dyn ChatTransport>,
    shared: Arc<Shared>,
}

struct Shared {
    conversation_id: ConversationId,
    variant: EndpointVariant,
    state: Mutex<ConversationState>,
    snapshots: watch::Sender<ConversationSnapshot>,
}

struct ConversationState {
    transcript: Transcript,
    lifecycle: RequestLifecycle,
    next_session_id: u64,
    active: Option<ActiveTurn>,
    diagnostics: Option<mpsc::UnboundedSender<Diagnostic>>,
}

/// Controller-side bookkeeping for the in-flight turn.
struct ActiveTurn {
    target: StreamTarget,
    // Set once the stream opened and the answer message exists.
    accumulator: Option<TranscriptAccumulator>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

enum LineFlow {
    Continue,
    Terminal,
    Stale,
}

impl ConversationController {
    pub fn new(
        id: ConversationId,
        variant: EndpointVariant,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        let (snapshots, _) = watch::channel(ConversationSnapshot::new(id, variant));
        let shared = Shared {
            conversation_id: id,
            variant,
            state: Mutex::new(ConversationState {
                transcript: Transcript::new(),
                lifecycle: RequestLifecycle::Idle,
                next_session_id: 1,
                active: None,
                diagnostics: None,
            }),
            snapshots,
        };

        Self {
            id,
            variant,
            transport,
            shared: Arc::new(shared),
        }
    }

    /// Routes unusable stream lines to `sink` in addition to the log.
    pub fn with_diagnostics(self, sink: mpsc::UnboundedSender<Diagnostic>) -> Self {
        self.shared.lock().diagnostics = Some(sink);
        self
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn variant(&self) -> EndpointVariant {
        self.variant
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        self.shared.snapshots.borrow().clone()
    }

    /// Change notifications; the receiver always holds the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ConversationSnapshot> {
        self.shared.snapshots.subscribe()
    }

    pub fn transcript(&self) -> Transcript {
        self.shared.lock().transcript.clone()
    }

    pub fn lifecycle(&self) -> RequestLifecycle {
        self.shared.lock().lifecycle.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.shared.lock().lifecycle.is_pending()
    }

    /// Starts a turn for `question`.
    ///
    /// Blank questions and submissions while a turn is in flight are rejected
    /// without touching the transcript. Must be called from within a Tokio runtime.
    pub fn submit(&self, question: &str) -> ChatResult<StreamTarget> {
        ensure!(
            !question.trim().is_empty(),
            EmptyQuestionSnafu {
                stage: "submit-validate-question",
            }
        );

        let (cancel_tx, cancel_rx) = oneshot::channel();

        let target = {
            let mut state = self.shared.lock();
            let target = StreamTarget::new(self.id, StreamSessionId::new(state.next_session_id));

            let next_lifecycle = match state.lifecycle.apply(LifecycleTransition::Start(target)) {
                Ok(next) => next,
                Err(rejection) => {
                    tracing::debug!(?rejection, "submission rejected while a turn is in flight");
                    let active = state.lifecycle.active_target().unwrap_or(target);
                    return AlreadyPendingSnafu {
                        stage: "submit-start-turn",
                        active,
                    }
                    .fail();
                }
            };

            // Reserve the session id so a later turn never reuses this target.
            state.next_session_id = state.next_session_id.saturating_add(1);
            state.lifecycle = next_lifecycle;
            state.transcript.push(ChatMessage::user(question));
            state.active = Some(ActiveTurn {
                target,
                accumulator: None,
                cancel_tx: Some(cancel_tx),
            });
            self.shared.publish(&state);
            target
        };

        tracing::debug!(?target, variant = %self.variant, "turn started");

        tokio::spawn(run_turn(
            Arc::clone(&self.shared),
            Arc::clone(&self.transport),
            question.to_string(),
            target,
            cancel_rx,
        ));

        Ok(target)
    }

    /// Abandons the in-flight turn, keeping whatever content already arrived.
    ///
    /// Returns false when nothing was in flight.
    pub fn cancel(&self) -> bool {
        let mut state = self.shared.lock();
        let Some(mut turn) = state.active.take() else {
            return false;
        };

        if let Some(cancel_tx) = turn.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }

        tracing::debug!(target = ?turn.target, "turn cancelled");
        state.settle(turn, TurnOutcome::Cancelled);
        self.shared.publish(&state);
        true
    }
}

impl Drop for ConversationController {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &ConversationState) {
        self.snapshots.send_replace(ConversationSnapshot {
            conversation_id: self.conversation_id,
            variant: self.variant,
            transcript: state.transcript.clone(),
            lifecycle: state.lifecycle.clone(),
        });
    }

    fn fail_open(&self, target: StreamTarget, error: &TransportError) {
        let mut state = self.lock();
        let Some(turn) = state.take_turn(target) else {
            return;
        };

        state
            .transcript
            .push(ChatMessage::assistant_notice(format!("Error: {error}")));
        state.settle(
            turn,
            TurnOutcome::OpenFailed {
                message: error.to_string(),
            },
        );
        self.publish(&state);
    }

    fn begin_answer(&self, target: StreamTarget) -> Option<TranscriptAccumulator> {
        let mut state = self.lock();
        if !state.lifecycle.accepts_stream_event(target) {
            return None;
        }

        let message_id = state.transcript.push(ChatMessage::assistant_streaming());
        debug_assert_eq!(state.transcript.streaming_count(), 1);
        let accumulator = TranscriptAccumulator::new(message_id);
        if let Some(turn) = state.active.as_mut() {
            turn.accumulator = Some(accumulator);
        }
        self.publish(&state);
        Some(accumulator)
    }

    fn apply_line(
        &self,
        target: StreamTarget,
        accumulator: TranscriptAccumulator,
        line: &str,
    ) -> LineFlow {
        let mut state = self.lock();
        if !state.lifecycle.accepts_stream_event(target) {
            return LineFlow::Stale;
        }

        let event = match parse_line(line) {
            Ok(Some(event)) => event,
            Ok(None) => return LineFlow::Continue,
            Err(error) => {
                tracing::warn!(?target, %line, error = %error, "skipping malformed stream line");
                if let Some(sink) = &state.diagnostics {
                    let _ = sink.send(Diagnostic {
                        target,
                        line: line.to_string(),
                        reason: error.to_string(),
                    });
                }
                return LineFlow::Continue;
            }
        };

        let progress = accumulator.apply(&mut state.transcript, &event);
        if progress.terminal {
            // Settle under the same lock so a concurrent cancel cannot relabel the turn.
            if let Some(turn) = state.take_turn(target) {
                tracing::info!(?target, "turn settled");
                state.settle(turn, TurnOutcome::Completed);
            }
            self.publish(&state);
            return LineFlow::Terminal;
        }
        if progress.changed {
            self.publish(&state);
        }
        LineFlow::Continue
    }

    fn finish(&self, target: StreamTarget, outcome: TurnOutcome) {
        let mut state = self.lock();
        let Some(turn) = state.take_turn(target) else {
            return;
        };

        tracing::info!(?target, ?outcome, "turn settled");
        state.settle(turn, outcome);
        self.publish(&state);
    }
}

impl ConversationState {
    fn take_turn(&mut self, target: StreamTarget) -> Option<ActiveTurn> {
        if self.active.as_ref().is_some_and(|turn| turn.target == target) {
            self.active.take()
        } else {
            None
        }
    }

    /// Completes the answer message, if any, and leaves `Pending`.
    fn settle(&mut self, turn: ActiveTurn, outcome: TurnOutcome) {
        if let Some(accumulator) = turn.accumulator {
            accumulator.mark_complete(&mut self.transcript);
        }

        match self.lifecycle.apply(LifecycleTransition::Settle {
            target: turn.target,
            outcome,
        }) {
            Ok(next) => self.lifecycle = next,
            Err(rejection) => {
                tracing::warn!(target = ?turn.target, ?rejection, "failed to settle turn");
            }
        }
    }
}

async fn run_turn(
    shared: Arc<Shared>,
    transport: Arc<dyn ChatTransport>,
    question: String,
    target: StreamTarget,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let variant = shared.variant;

    let opened = tokio::select! {
        biased;
        _ = &mut cancel_rx => {
            tracing::debug!(?target, "turn abandoned before the stream opened");
            return;
        }
        opened = transport.open_stream(&question, variant) => opened,
    };

    let stream = match opened {
        Ok(stream) => stream,
        Err(error) => {
            tracing::error!(?target, %variant, error = %error, "failed to open chat stream");
            shared.fail_open(target, &error);
            return;
        }
    };

    let Some(accumulator) = shared.begin_answer(target) else {
        tracing::debug!(?target, "turn abandoned while the stream was opening");
        return;
    };

    // The decoder and byte stream live in this frame and are dropped on every exit.
    let mut lines = std::pin::pin!(decode_lines(stream));

    let outcome = loop {
        tokio::select! {
            biased;
            _ = &mut cancel_rx => {
                tracing::debug!(?target, "releasing cancelled chat stream");
                return;
            }
            next = lines.next() => match next {
                Some(Ok(line)) => match shared.apply_line(target, accumulator, &line) {
                    LineFlow::Continue => {}
                    LineFlow::Terminal | LineFlow::Stale => return,
                },
                Some(Err(error)) => {
                    tracing::warn!(
                        ?target,
                        error = %error,
                        "chat stream broke before the terminal event"
                    );
                    break TurnOutcome::Truncated {
                        error: Some(error.to_string()),
                    };
                }
                None => {
                    tracing::warn!(?target, "chat stream ended before the terminal event");
                    break TurnOutcome::Truncated { error: None };
                }
            }
        }
    };

    shared.finish(target, outcome);
}
