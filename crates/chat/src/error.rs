use docchat_transport::{RequestId, TransportError};
use snafu::Snafu;

use crate::chat::transcript::TurnId;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("query is empty on `{stage}`"))]
    EmptyQuery { stage: &'static str },
    #[snafu(display("turn {turn_id} not found on `{stage}`"))]
    UnknownTurn {
        stage: &'static str,
        turn_id: TurnId,
    },
    #[snafu(display("turn {turn_id} has no version {version_index} on `{stage}`"))]
    UnknownVersion {
        stage: &'static str,
        turn_id: TurnId,
        version_index: u32,
    },
    #[snafu(display("no pending turn for {request_id} on `{stage}`"))]
    NoPendingTurn {
        stage: &'static str,
        request_id: RequestId,
    },
    #[snafu(display("{received} does not match pending {expected} on `{stage}`"))]
    StaleRequest {
        stage: &'static str,
        expected: RequestId,
        received: RequestId,
    },
    #[snafu(display("another turn is already pending on `{stage}`"))]
    TurnInFlight { stage: &'static str },
    #[snafu(display("failed to start transport on `{stage}`: {source}"))]
    StartTransport {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("no async runtime available on `{stage}`: {source}"))]
    NoRuntime {
        stage: &'static str,
        source: tokio::runtime::TryCurrentError,
    },
    #[snafu(display("failed to fetch history for session {session_id} on `{stage}`: {source}"))]
    FetchPage {
        stage: &'static str,
        session_id: String,
        source: TransportError,
    },
}

pub type ChatResult<T> = Result<T, ChatError>;
