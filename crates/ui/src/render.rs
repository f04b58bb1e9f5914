//! Plain-text rendering of conversations for the terminal.

use std::collections::HashMap;

use rill_chat::{Author, ChatMessage, ConversationId, ConversationSnapshot, EndpointVariant};

pub const THINKING_PLACEHOLDER: &str = "Thinking...";
pub const TYPING_INDICATOR: &str = "▌";

pub fn widget_title(variant: EndpointVariant) -> String {
    format!("Chatbox type: {}", variant.name().to_ascii_uppercase())
}

fn speaker(author: Author) -> &'static str {
    match author {
        Author::User => "you",
        Author::Assistant => "assistant",
    }
}

/// Full rendering of one message as a widget would show it.
pub fn render_message(message: &ChatMessage) -> String {
    if !message.is_streaming() {
        return message.content().to_string();
    }
    if message.content().is_empty() {
        return THINKING_PLACEHOLDER.to_string();
    }
    format!("{}{}", message.content(), TYPING_INDICATOR)
}

/// Renders a whole conversation, one `speaker: text` line per message.
pub fn render_transcript(snapshot: &ConversationSnapshot) -> String {
    let mut output = widget_title(snapshot.variant);
    output.push('\n');
    for message in snapshot.messages() {
        output.push_str(speaker(message.author()));
        output.push_str(": ");
        output.push_str(&render_message(message));
        output.push('\n');
    }
    output
}

fn line_prefix(variant: EndpointVariant, author: Author) -> String {
    format!("[{}] {}: ", variant, speaker(author))
}

/// Turns successive snapshots of one conversation into append-only output.
///
/// Streaming content only ever grows at the end, so the printer remembers how
/// many messages it has finished and how many bytes of the open one it wrote.
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    finished: usize,
    written: Option<usize>,
    // Another conversation ended our line; the next text needs a fresh prefix.
    interrupted: bool,
}

impl TranscriptPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a streaming message owns the current terminal line.
    pub fn has_open_line(&self) -> bool {
        self.written.is_some() && !self.interrupted
    }

    /// Records that the terminal line was ended by someone else.
    pub fn interrupt(&mut self) {
        if self.written.is_some() {
            self.interrupted = true;
        }
    }

    pub fn update(&mut self, snapshot: &ConversationSnapshot) -> String {
        let mut output = String::new();
        let messages = snapshot.messages();

        while let Some(message) = messages.get(self.finished) {
            let written = match self.written {
                Some(written) => written,
                None => {
                    output.push_str(&line_prefix(snapshot.variant, message.author()));
                    0
                }
            };

            let tail = message.content().get(written..).unwrap_or_default();
            if self.interrupted && !tail.is_empty() {
                output.push_str(&line_prefix(snapshot.variant, message.author()));
                self.interrupted = false;
            }
            output.push_str(tail);

            if message.is_streaming() {
                self.written = Some(message.content().len());
                break;
            }

            // An interrupted line was already terminated.
            if !self.interrupted {
                output.push('\n');
            }
            self.interrupted = false;
            self.written = None;
            self.finished += 1;
        }

        output
    }
}

/// Shares one terminal between the printers of several conversations.
///
/// At most one conversation owns the unterminated line; output from any other
/// conversation ends that line first, and the owner reprints its prefix when
/// it continues.
#[derive(Debug, Default)]
pub struct TranscriptMux {
    printers: HashMap<ConversationId, TranscriptPrinter>,
    open_line: Option<ConversationId>,
}

impl TranscriptMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, conversation_id: ConversationId) {
        self.printers.entry(conversation_id).or_default();
    }

    /// Ends the open line, if any, before unrelated output.
    pub fn end_line(&mut self) -> &'static str {
        let owner = self
            .open_line
            .take()
            .and_then(|owner| self.printers.get_mut(&owner));
        match owner {
            Some(printer) => {
                printer.interrupt();
                "\n"
            }
            None => "",
        }
    }

    /// Output for `snapshot`; empty for untracked conversations.
    pub fn update(&mut self, snapshot: &ConversationSnapshot) -> String {
        let conversation_id = snapshot.conversation_id;
        let Some(printer) = self.printers.get_mut(&conversation_id) else {
            return String::new();
        };

        let text = printer.update(snapshot);
        let owns_line = printer.has_open_line();
        if text.is_empty() {
            return text;
        }

        let mut output = String::new();
        if let Some(owner) = self.open_line.filter(|owner| *owner != conversation_id) {
            output.push('\n');
            if let Some(owner) = self.printers.get_mut(&owner) {
                owner.interrupt();
            }
        }
        output.push_str(&text);

        self.open_line = owns_line.then_some(conversation_id);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_chat::{Transcript, TranscriptAccumulator};

    #[test]
    fn titles_name_the_variant() {
        assert_eq!(widget_title(EndpointVariant::General), "Chatbox type: GENERAL");
        assert_eq!(
            widget_title(EndpointVariant::Contextual),
            "Chatbox type: CONTEXTUAL"
        );
    }

    #[test]
    fn streaming_messages_show_placeholder_then_indicator() {
        assert_eq!(
            render_message(&ChatMessage::assistant_streaming()),
            THINKING_PLACEHOLDER
        );
        assert_eq!(render_message(&ChatMessage::user("hello")), "hello");
        assert_eq!(
            render_message(&ChatMessage::assistant_notice("Error: API error: 500")),
            "Error: API error: 500"
        );
    }

    fn snapshot(messages: Vec<ChatMessage>) -> ConversationSnapshot {
        let mut transcript = Transcript::new();
        for message in messages {
            transcript.push(message);
        }
        ConversationSnapshot {
            transcript,
            ..ConversationSnapshot::new(ConversationId::new(1), EndpointVariant::General)
        }
    }

    #[test]
    fn whole_transcript_renders_every_message() {
        let rendered = render_transcript(&snapshot(vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant_streaming(),
        ]));
        assert_eq!(
            rendered,
            "Chatbox type: GENERAL\nyou: hi\nassistant: Thinking...\n"
        );
    }

    #[test]
    fn printer_emits_only_new_text() {
        let mut printer = TranscriptPrinter::new();
        let mut state = snapshot(vec![]);
        assert_eq!(printer.update(&state), "");

        state.transcript.push(ChatMessage::user("hi"));
        assert_eq!(printer.update(&state), "[general] you: hi\n");

        let answer_id = state.transcript.push(ChatMessage::assistant_streaming());
        assert_eq!(printer.update(&state), "[general] assistant: ");

        let accumulator = TranscriptAccumulator::new(answer_id);
        accumulator.append_fragment(&mut state.transcript, "The ");
        assert_eq!(printer.update(&state), "The ");
        assert_eq!(printer.update(&state), "");

        accumulator.append_fragment(&mut state.transcript, "answer");
        accumulator.mark_complete(&mut state.transcript);
        assert_eq!(printer.update(&state), "answer\n");
        assert_eq!(printer.update(&state), "");
    }

    fn conversation(id: u64, variant: EndpointVariant) -> ConversationSnapshot {
        ConversationSnapshot::new(ConversationId::new(id), variant)
    }

    fn start_turn(snapshot: &mut ConversationSnapshot, question: &str) -> TranscriptAccumulator {
        snapshot.transcript.push(ChatMessage::user(question));
        let answer = snapshot.transcript.push(ChatMessage::assistant_streaming());
        TranscriptAccumulator::new(answer)
    }

    #[test]
    fn interleaved_answers_keep_their_own_prefix() {
        let mut mux = TranscriptMux::new();
        let mut general = conversation(1, EndpointVariant::General);
        let mut contextual = conversation(2, EndpointVariant::Contextual);
        mux.track(general.conversation_id);
        mux.track(contextual.conversation_id);

        let general_answer = start_turn(&mut general, "q1");
        let contextual_answer = start_turn(&mut contextual, "q2");
        let mut output = mux.update(&general);
        output.push_str(&mux.update(&contextual));

        general_answer.append_fragment(&mut general.transcript, "A1");
        output.push_str(&mux.update(&general));
        contextual_answer.append_fragment(&mut contextual.transcript, "B1");
        output.push_str(&mux.update(&contextual));

        general_answer.append_fragment(&mut general.transcript, "A2");
        general_answer.mark_complete(&mut general.transcript);
        output.push_str(&mux.update(&general));
        contextual_answer.append_fragment(&mut contextual.transcript, "B2");
        contextual_answer.mark_complete(&mut contextual.transcript);
        output.push_str(&mux.update(&contextual));

        assert_eq!(
            output,
            "[general] you: q1\n\
             [general] assistant: \n\
             [contextual] you: q2\n\
             [contextual] assistant: \n\
             [general] assistant: A1\n\
             [contextual] assistant: B1\n\
             [general] assistant: A2\n\
             [contextual] assistant: B2\n"
        );
    }

    #[test]
    fn owner_continues_its_line_until_something_else_is_printed() {
        let mut mux = TranscriptMux::new();
        let mut general = conversation(1, EndpointVariant::General);
        let untracked = conversation(9, EndpointVariant::Contextual);
        mux.track(general.conversation_id);

        let answer = start_turn(&mut general, "q");
        assert_eq!(mux.update(&general), "[general] you: q\n[general] assistant: ");
        assert_eq!(mux.update(&untracked), "");

        answer.append_fragment(&mut general.transcript, "do");
        assert_eq!(mux.update(&general), "do");

        // A command reply in the middle of an answer.
        assert_eq!(mux.end_line(), "\n");
        assert_eq!(mux.end_line(), "");

        answer.append_fragment(&mut general.transcript, "ne");
        answer.mark_complete(&mut general.transcript);
        assert_eq!(mux.update(&general), "[general] assistant: ne\n");
    }

    #[test]
    fn interrupted_answer_completing_without_text_adds_no_blank_line() {
        let mut printer = TranscriptPrinter::new();
        let mut general = conversation(1, EndpointVariant::General);
        let answer = start_turn(&mut general, "q");
        printer.update(&general);
        answer.append_fragment(&mut general.transcript, "part");
        assert_eq!(printer.update(&general), "part");
        assert!(printer.has_open_line());

        printer.interrupt();
        assert!(!printer.has_open_line());
        answer.mark_complete(&mut general.transcript);
        assert_eq!(printer.update(&general), "");
    }
}
