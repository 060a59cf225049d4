use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DispatchError>;

impl DispatchError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(Box::new(std::io::Error::other(msg.into())))
    }

    /// Whether the caller can fix the request and try again.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::ValidationError(_) | Self::Conflict(_) | Self::InvalidState(_) | Self::NotFound(_)
        )
    }

    /// Message safe to hand back to a client. Internal and upstream failures
    /// collapse to a generic text; the detail stays in the server log.
    pub fn public_message(&self) -> String {
        match self {
            Self::UpstreamFailure(_) => "payment could not be completed".to_string(),
            Self::InternalError(_) | Self::CsvError(_) | Self::IoError(_) => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        Self::InternalError(Box::new(err))
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::InternalError(Box::new(err))
    }
}
