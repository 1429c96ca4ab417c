use thiserror::Error;

use crate::core::state::ScriptStatus;

/// Coarse classification used by the retry wrapper and the fallback chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Throttling, timeouts, dependency failures, broken streams.
    Transient,
    /// Expired or invalid credentials. Worth one refresh.
    Auth,
    /// The caller is not allowed to invoke the model. Never retried.
    Authorization,
    /// The backend answered but nothing usable could be extracted.
    NoContent,
    /// The request itself was rejected (bad model id, malformed body).
    InvalidRequest,
    Fatal,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not authorized to invoke the model: {0}")]
    Authorization(String),

    #[error("no usable content in response: {0}")]
    NoContent(String),

    #[error("request rejected ({status}): {message}")]
    InvalidRequest { status: u16, message: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("backend error: {0}")]
    Other(String),
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::Transient(_) => ErrorKind::Transient,
            LlmError::Auth(_) => ErrorKind::Auth,
            LlmError::Authorization(_) => ErrorKind::Authorization,
            LlmError::NoContent(_) => ErrorKind::NoContent,
            LlmError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            LlmError::Connection(_) | LlmError::Config(_) | LlmError::Other(_) => ErrorKind::Fatal,
        }
    }

    pub fn no_content(reason: impl Into<String>) -> Self {
        LlmError::NoContent(reason.into())
    }
}

/// An illegal lifecycle transition on a script record.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot {action} a script in status '{from}'")]
pub struct StateError {
    pub from: ScriptStatus,
    pub action: &'static str,
}

/// Errors surfaced by the orchestrator. `status_code` keeps the
/// validation / not-found / internal split expected by an HTTP front end.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkflowError {
    pub fn status_code(&self) -> u16 {
        match self {
            WorkflowError::Validation(_) => 400,
            WorkflowError::NotFound(_) => 404,
            WorkflowError::State(_) => 400,
            WorkflowError::Llm(_) | WorkflowError::Other(_) => 500,
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
