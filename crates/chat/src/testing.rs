//! In-memory transports for controller tests.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use futures::channel::{mpsc, oneshot};
use futures::stream;
use rill_llm::{
    BoxFuture, ByteStream, ChatTransport, EndpointVariant, TransportError, TransportResult,
};

use crate::controller::ConversationController;
use crate::events::ConversationSnapshot;

pub(crate) type Hook = Box<dyn FnOnce() + Send>;

pub(crate) enum Script {
    Chunks(Vec<TransportResult<Bytes>>),
    Channel(mpsc::UnboundedReceiver<TransportResult<Bytes>>),
    FailOpen { status: u16, reason: &'static str },
    /// Holds the open until `gate` resolves, then plays `then`.
    Gated {
        gate: oneshot::Receiver<()>,
        then: Box<Script>,
    },
    /// Runs `hook` inside the poll that completes the open.
    OnOpen { hook: Hook, then: Box<Script> },
    /// One chunk whose read runs `hook` first, inside the reader's poll.
    OnRead { hook: Hook, chunk: &'static str },
}

impl Script {
    pub(crate) fn lines(lines: &[&str]) -> Self {
        Self::Chunks(
            lines
                .iter()
                .map(|line| Ok(Bytes::from(line.to_string())))
                .collect(),
        )
    }
}

/// Hands out one prepared stream per `open_stream` call, in order.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    scripts: Mutex<VecDeque<(Script, Option<oneshot::Sender<()>>)>>,
    calls: Mutex<Vec<(String, EndpointVariant)>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back((script, None));
    }

    /// Queues a script and returns a receiver that resolves once its stream is dropped.
    pub(crate) fn push_watched(&self, script: Script) -> oneshot::Receiver<()> {
        let (released_tx, released_rx) = oneshot::channel();
        self.scripts
            .lock()
            .unwrap()
            .push_back((script, Some(released_tx)));
        released_rx
    }

    pub(crate) fn calls(&self) -> Vec<(String, EndpointVariant)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ChatTransport for ScriptedTransport {
    fn open_stream<'a>(
        &'a self,
        question: &'a str,
        variant: EndpointVariant,
    ) -> BoxFuture<'a, TransportResult<ByteStream>> {
        self.calls
            .lock()
            .unwrap()
            .push((question.to_string(), variant));
        let next = self.scripts.lock().unwrap().pop_front();

        Box::pin(async move {
            let (mut script, released) = next.expect("no script queued for open_stream");
            let inner: ByteStream = loop {
                script = match script {
                    Script::Chunks(chunks) => break Box::pin(stream::iter(chunks)),
                    Script::Channel(receiver) => break Box::pin(receiver),
                    Script::FailOpen { status, reason } => {
                        return Err(TransportError::Status {
                            stage: "scripted-open",
                            status,
                            reason: reason.to_string(),
                        });
                    }
                    Script::Gated { gate, then } => {
                        let _ = gate.await;
                        *then
                    }
                    Script::OnOpen { hook, then } => {
                        hook();
                        *then
                    }
                    Script::OnRead { hook, chunk } => {
                        break Box::pin(stream::once(async move {
                            hook();
                            Ok::<_, TransportError>(Bytes::from_static(chunk.as_bytes()))
                        }));
                    }
                };
            };
            Ok(Box::pin(ReleaseGuard {
                inner,
                _released: released,
            }) as ByteStream)
        })
    }
}

struct ReleaseGuard {
    inner: ByteStream,
    _released: Option<oneshot::Sender<()>>,
}

impl Stream for ReleaseGuard {
    type Item = TransportResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

pub(crate) fn chunk(text: &str) -> TransportResult<Bytes> {
    Ok(Bytes::from(text.to_string()))
}

/// Waits until the controller has left `Pending`.
pub(crate) async fn settled(controller: &ConversationController) -> ConversationSnapshot {
    wait_for(controller, |snapshot| !snapshot.is_pending()).await
}

pub(crate) async fn wait_for(
    controller: &ConversationController,
    predicate: impl FnMut(&ConversationSnapshot) -> bool,
) -> ConversationSnapshot {
    let mut receiver = controller.subscribe();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), receiver.wait_for(predicate))
        .await
        .expect("timed out waiting for conversation state")
        .expect("controller dropped");
    ConversationSnapshot::clone(&snapshot)
}
