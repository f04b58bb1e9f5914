use serde::Deserialize;
use serde_json::error::Category;
use snafu::Snafu;

/// One decoded stream line in chat domain terms.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamEvent {
    /// Non-empty text to append to the streaming answer.
    pub fragment: Option<String>,
    /// Terminal signal. Apply `fragment` first.
    pub done: bool,
}

impl StreamEvent {
    pub fn fragment(text: impl Into<String>) -> Self {
        Self {
            fragment: Some(text.into()),
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            fragment: None,
            done: true,
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EventParseError {
    #[snafu(display("line is not valid JSON: {source}"))]
    Syntax {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("line does not match the event shape: {source}"))]
    Shape {
        stage: &'static str,
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    done: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Parses one line of `{"message":{"content":...},"done":...}`.
///
/// Returns `Ok(None)` for blank lines. Unknown fields are ignored, so full Ollama
/// chat chunks parse as well.
pub fn parse_line(line: &str) -> Result<Option<StreamEvent>, EventParseError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let wire = serde_json::from_str::<WireEvent>(trimmed).map_err(|source| {
        if source.classify() == Category::Data {
            EventParseError::Shape {
                stage: "parse-event-shape",
                source,
            }
        } else {
            EventParseError::Syntax {
                stage: "parse-event-json",
                source,
            }
        }
    })?;

    let fragment = wire
        .message
        .and_then(|message| message.content)
        .filter(|content| !content.is_empty());

    Ok(Some(StreamEvent {
        fragment,
        done: wire.done.unwrap_or(false),
    }))
}
