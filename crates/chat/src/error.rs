use snafu::Snafu;

use crate::message::{ConversationId, StreamTarget};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SubmitError {
    #[snafu(display("question is empty"))]
    EmptyQuestion { stage: &'static str },
    #[snafu(display("a request is already in flight for {active:?}"))]
    AlreadyPending {
        stage: &'static str,
        active: StreamTarget,
    },
    #[snafu(display("{conversation_id} is not open"))]
    UnknownConversation {
        stage: &'static str,
        conversation_id: ConversationId,
    },
}

pub type ChatResult<T> = Result<T, SubmitError>;
