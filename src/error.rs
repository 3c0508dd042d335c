use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunerError {
    /// Malformed or unusable pipeline module, pipeline or configuration.
    #[error("Contract error: {0}")]
    Contract(String),

    /// The pipeline module broke its protocol (not a trial failure).
    #[error("Evaluator error: {0}")]
    Evaluator(String),

    #[error("Recording error: {0}")]
    Recording(String),

    #[error("Filter error: {0}")]
    Filter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl TunerError {
    pub fn contract(msg: impl Into<String>) -> Self {
        TunerError::Contract(msg.into())
    }

    pub fn is_contract(&self) -> bool {
        matches!(self, TunerError::Contract(_))
    }
}

pub type Result<T> = std::result::Result<T, TunerError>;
