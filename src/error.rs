use thiserror::Error;

#[derive(Error, Debug)]
pub enum NlqError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM API error ({status}): {body}")]
    LlmStatus { status: u16, body: String },

    /// The database rejected the statement.
    #[error("Execution error: {0}")]
    Execution(String),

    /// The statement never got a verdict: pool timeout, lost connection, decode failure.
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database unavailable: {0}")]
    ConnectionDegraded(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NlqError {
    /// Transport failures talking to the model endpoint.
    pub fn is_transport(&self) -> bool {
        matches!(self, NlqError::Llm(_) | NlqError::LlmStatus { .. })
    }
}

pub type Result<T> = std::result::Result<T, NlqError>;
