use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The monitoring backend was unreachable or answered with something we
    /// could not make sense of. Retried on the next tick.
    #[error("query failed: {0}")]
    Query(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no suppression recorded for {metric}.{label}")]
    NotSuppressed { metric: String, label: String },

    #[error("write to {location} still conflicting after {attempts} attempts")]
    WriteConflictExhausted { location: String, attempts: usize },

    #[error("rendered configuration did not reflect the change after {attempts} attempts")]
    PropagationTimeout { attempts: usize },

    #[error("reload failed: {0}")]
    Reload(String),

    #[error("store {location}: {message}")]
    Store { location: String, message: String },

    #[error("metrics registry: {0}")]
    Metrics(String),

    #[error("failed to decode document: {0}")]
    Decode(#[from] serde_yaml::Error),
}

impl Error {
    pub(crate) fn store(location: impl Into<String>, message: impl ToString) -> Self {
        Self::Store {
            location: location.into(),
            message: message.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Query(err.to_string())
    }
}
