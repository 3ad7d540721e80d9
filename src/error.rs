use agent_provider::{RequestId, SessionId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("unknown session '{session_id}'")]
    UnknownSession { session_id: SessionId },

    #[error("command has no content")]
    EmptyCommand,

    #[error("failed to schedule task for session '{session_id}': {reason}")]
    Schedule {
        session_id: SessionId,
        reason: String,
    },

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("unknown request '{request_id}'")]
    UnknownRequest { request_id: RequestId },

    #[error("request '{request_id}' is already resolved")]
    AlreadyResolved { request_id: RequestId },

    #[error("request '{request_id}' already exists")]
    DuplicateRequest { request_id: RequestId },

    #[error("request '{request_id}' is a {expected} request")]
    WrongKind {
        request_id: RequestId,
        expected: &'static str,
    },

    #[error("invalid answer for request '{request_id}': {reason}")]
    InvalidAnswer {
        request_id: RequestId,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{filter}': {source}")]
    Filter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("I/O error while opening log file {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}
