use std::sync::Arc;

use rill_chat::{
    ChatSessionRegistry, ConversationController, ConversationId, ConversationSnapshot, Diagnostic,
    EndpointVariant, StreamTarget, SubmitError,
};
use rill_llm::{ChatTransport, HttpTransport, TransportError};
use snafu::{OptionExt, ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};

use crate::render::{TranscriptMux, render_transcript, widget_title};
use crate::settings::AppSettings;

pub const HELP: &str = "\
commands:
  chat <question>   ask the general assistant
  ask <question>    ask the contextual assistant
  <question>        ask the first chat box
  stop              abandon every answer in flight
  show              print every conversation so far
  ping              check that the backend is reachable
  help              show this list
  quit              leave
";

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `None` targets the first configured chat box.
    Submit {
        variant: Option<EndpointVariant>,
        question: String,
    },
    Stop,
    Show,
    Ping,
    Help,
    Quit,
    Empty,
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }

        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };

        // `chat` and `ask` are the backend routes of the two variants.
        if let Some(variant) = EndpointVariant::from_path(head) {
            return Self::Submit {
                variant: Some(variant),
                question: rest.to_string(),
            };
        }

        match (head.to_ascii_lowercase().as_str(), rest.is_empty()) {
            ("stop", true) => Self::Stop,
            ("show", true) => Self::Show,
            ("ping", true) => Self::Ping,
            ("help" | "?", true) => Self::Help,
            ("quit" | "exit", true) => Self::Quit,
            _ => Self::Submit {
                variant: None,
                question: line.to_string(),
            },
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to set up the chat backend client on `{stage}`: {source}"))]
    BuildTransport {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("{source}"))]
    Submit {
        stage: &'static str,
        source: SubmitError,
    },
    #[snafu(display("no chat box is configured for {requested}"))]
    NoWidget {
        stage: &'static str,
        requested: String,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to write output on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        source: std::io::Error,
    },
}

/// The chat boxes of one session, in display order.
pub struct App {
    registry: ChatSessionRegistry,
    widgets: Vec<(EndpointVariant, ConversationId)>,
    skipped_lines: usize,
}

impl App {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        widgets: &[EndpointVariant],
        diagnostics: mpsc::UnboundedSender<Diagnostic>,
    ) -> Self {
        let mut registry = ChatSessionRegistry::new(transport).with_diagnostics(diagnostics);
        let widgets = widgets
            .iter()
            .map(|variant| (*variant, registry.open(*variant)))
            .collect();

        Self {
            registry,
            widgets,
            skipped_lines: 0,
        }
    }

    pub fn widgets(&self) -> &[(EndpointVariant, ConversationId)] {
        &self.widgets
    }

    pub fn registry(&self) -> &ChatSessionRegistry {
        &self.registry
    }

    pub fn banner(&self) -> String {
        let mut banner = String::new();
        for (variant, _) in &self.widgets {
            banner.push_str(&widget_title(*variant));
            banner.push('\n');
        }
        banner.push_str("type `help` for commands\n");
        banner
    }

    pub fn submit(
        &self,
        variant: Option<EndpointVariant>,
        question: &str,
    ) -> Result<StreamTarget, AppError> {
        let conversation_id = match variant {
            Some(variant) => self
                .registry
                .find_by_variant(variant)
                .map(ConversationController::id),
            None => self.widgets.first().map(|(_, id)| *id),
        }
        .context(NoWidgetSnafu {
            stage: "resolve-widget",
            requested: variant.map_or_else(|| "the default chat box".to_string(), widget_title),
        })?;

        self.registry
            .submit(conversation_id, question)
            .context(SubmitSnafu {
                stage: "submit-question",
            })
    }

    /// Cancels every in-flight answer, returning how many there were.
    pub fn stop(&self) -> usize {
        self.widgets
            .iter()
            .filter(|(_, id)| self.registry.cancel(*id))
            .count()
    }

    /// Closes every chat box, abandoning answers still in flight.
    ///
    /// Returns how many answers were abandoned.
    pub fn shutdown(&mut self) -> usize {
        let abandoned = self.stop();
        for (_, id) in self.widgets.drain(..) {
            self.registry.close(id);
        }
        abandoned
    }

    pub fn note_diagnostic(&mut self, diagnostic: &Diagnostic) {
        self.skipped_lines += 1;
        tracing::debug!(
            conversation_id = %diagnostic.target.conversation_id,
            skipped_lines = self.skipped_lines,
            "stream line skipped"
        );
    }

    pub fn show(&self) -> String {
        let mut output = String::new();
        for (_, id) in &self.widgets {
            if let Some(controller) = self.registry.get(*id) {
                output.push_str(&render_transcript(&controller.snapshot()));
            }
        }
        if self.skipped_lines > 0 {
            output.push_str(&format!(
                "({} unreadable stream line(s) skipped)\n",
                self.skipped_lines
            ));
        }
        output
    }
}

fn forward_snapshots(
    mut receiver: watch::Receiver<ConversationSnapshot>,
    sink: mpsc::UnboundedSender<ConversationSnapshot>,
) {
    tokio::spawn(async move {
        while receiver.changed().await.is_ok() {
            let snapshot = receiver.borrow_and_update().clone();
            if sink.send(snapshot).is_err() {
                break;
            }
        }
    });
}

async fn write_out(
    stdout: &mut tokio::io::Stdout,
    text: impl AsRef<str>,
) -> Result<(), AppError> {
    let text = text.as_ref();
    if text.is_empty() {
        return Ok(());
    }
    stdout.write_all(text.as_bytes()).await.context(WriteOutputSnafu {
        stage: "write-stdout",
    })?;
    stdout.flush().await.context(WriteOutputSnafu {
        stage: "flush-stdout",
    })
}

async fn ping_report(transport: &HttpTransport) -> String {
    match transport.ping().await {
        Ok(true) => format!("backend at {} is up\n", transport.base_url()),
        Ok(false) => format!("backend at {} answered but is not ok\n", transport.base_url()),
        Err(error) => {
            tracing::warn!(error = %error, "ping failed");
            format!("ping failed: {error}\n")
        }
    }
}

/// Reads commands from stdin until `quit` or end of input, printing answers as they stream.
pub async fn run(settings: &AppSettings) -> Result<(), AppError> {
    let http = Arc::new(
        HttpTransport::new(settings.transport_config()).context(BuildTransportSnafu {
            stage: "build-http-transport",
        })?,
    );
    tracing::info!(
        base_url = %http.base_url(),
        widgets = settings.widgets.len(),
        "starting chat session"
    );

    let (diagnostics_tx, mut diagnostics_rx) = mpsc::unbounded_channel();
    let transport: Arc<dyn ChatTransport> = http.clone();
    let mut app = App::new(transport, &settings.widgets, diagnostics_tx);

    let (snapshot_tx, mut snapshot_rx) = mpsc::unbounded_channel();
    let mut transcripts = TranscriptMux::new();
    for controller in app.registry().conversations() {
        forward_snapshots(controller.subscribe(), snapshot_tx.clone());
        transcripts.track(controller.id());
    }
    drop(snapshot_tx);

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    write_out(&mut stdout, app.banner()).await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context(ReadInputSnafu { stage: "read-stdin-line" })? else {
                    break;
                };
                let reply = match Command::parse(&line) {
                    Command::Quit => break,
                    Command::Empty => String::new(),
                    Command::Help => HELP.to_string(),
                    Command::Show => app.show(),
                    Command::Stop => format!("stopped {} answer(s)\n", app.stop()),
                    Command::Ping => ping_report(&http).await,
                    Command::Submit { variant, question } => match app.submit(variant, &question) {
                        Ok(_) => String::new(),
                        Err(error) => {
                            tracing::debug!(error = %error, "submission rejected");
                            format!("{error}\n")
                        }
                    },
                };
                if !reply.is_empty() {
                    write_out(&mut stdout, format!("{}{reply}", transcripts.end_line())).await?;
                }
            }
            Some(snapshot) = snapshot_rx.recv() => {
                write_out(&mut stdout, transcripts.update(&snapshot)).await?;
            }
            Some(diagnostic) = diagnostics_rx.recv() => app.note_diagnostic(&diagnostic),
        }
    }

    let abandoned = app.shutdown();
    tracing::info!(abandoned, "chat session ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use futures::stream;
    use rill_llm::{BoxFuture, ByteStream, TransportResult};

    use super::*;

    #[test]
    fn keywords_pick_the_endpoint() {
        assert_eq!(
            Command::parse("chat what is rust"),
            Command::Submit {
                variant: Some(EndpointVariant::General),
                question: "what is rust".to_string(),
            }
        );
        assert_eq!(
            Command::parse("  ASK   where is the manual "),
            Command::Submit {
                variant: Some(EndpointVariant::Contextual),
                question: "where is the manual".to_string(),
            }
        );
    }

    #[test]
    fn bare_text_goes_to_the_first_widget() {
        assert_eq!(
            Command::parse("stop the build?"),
            Command::Submit {
                variant: None,
                question: "stop the build?".to_string(),
            }
        );
        assert_eq!(Command::parse("stop"), Command::Stop);
        assert_eq!(Command::parse("Quit"), Command::Quit);
        assert_eq!(Command::parse("?"), Command::Help);
        assert_eq!(Command::parse("   "), Command::Empty);
    }

    struct CannedTransport;

    impl ChatTransport for CannedTransport {
        fn open_stream<'a>(
            &'a self,
            question: &'a str,
            variant: EndpointVariant,
        ) -> BoxFuture<'a, TransportResult<ByteStream>> {
            let line = format!(
                "{{\"message\":{{\"content\":\"{variant}: {question}\"}},\"done\":true}}\n"
            );
            Box::pin(async move {
                Ok(Box::pin(stream::iter(vec![Ok(Bytes::from(line))])) as ByteStream)
            })
        }
    }

    fn app(widgets: &[EndpointVariant]) -> App {
        let (sink, _diagnostics) = mpsc::unbounded_channel();
        App::new(Arc::new(CannedTransport), widgets, sink)
    }

    async fn settled(app: &App, id: ConversationId) -> ConversationSnapshot {
        let Some(controller) = app.registry().get(id) else {
            panic!("conversation {id} is not open");
        };
        let mut receiver = controller.subscribe();
        let snapshot = tokio::time::timeout(
            Duration::from_secs(5),
            receiver.wait_for(|snapshot| !snapshot.messages().is_empty() && !snapshot.is_pending()),
        )
        .await
        .unwrap()
        .unwrap();
        ConversationSnapshot::clone(&snapshot)
    }

    #[tokio::test]
    async fn submissions_reach_the_matching_widget() {
        let app = app(&[EndpointVariant::Contextual, EndpointVariant::General]);
        let [(_, contextual), (_, general)] = app.widgets() else {
            panic!("expected two widgets");
        };

        let target = app.submit(None, "first").unwrap();
        assert_eq!(target.conversation_id, *contextual);
        let snapshot = settled(&app, *contextual).await;
        assert_eq!(snapshot.messages()[1].content(), "contextual: first");

        app.submit(Some(EndpointVariant::General), "second").unwrap();
        let snapshot = settled(&app, *general).await;
        assert_eq!(snapshot.messages()[1].content(), "general: second");

        let shown = app.show();
        assert!(shown.starts_with("Chatbox type: CONTEXTUAL\n"));
        assert!(shown.contains("assistant: general: second\n"));
        assert_eq!(app.stop(), 0);
    }

    #[tokio::test]
    async fn missing_widgets_and_blank_questions_are_reported() {
        let app = app(&[EndpointVariant::General]);
        assert!(matches!(
            app.submit(Some(EndpointVariant::Contextual), "hello"),
            Err(AppError::NoWidget { .. })
        ));
        assert!(matches!(
            app.submit(Some(EndpointVariant::General), ""),
            Err(AppError::Submit {
                source: SubmitError::EmptyQuestion { .. },
                ..
            })
        ));
        assert_eq!(app.banner(), "Chatbox type: GENERAL\ntype `help` for commands\n");
    }

    #[tokio::test]
    async fn shutdown_closes_every_chat_box() {
        let mut app = app(&[EndpointVariant::General, EndpointVariant::Contextual]);
        assert_eq!(app.registry().len(), 2);

        assert_eq!(app.shutdown(), 0);
        assert!(app.registry().is_empty());
        assert!(app.widgets().is_empty());
        assert!(matches!(app.submit(None, "late"), Err(AppError::NoWidget { .. })));
    }
}
