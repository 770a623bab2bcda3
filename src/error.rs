//! Error types for the Mimir rules operator

use std::time::Duration;

use thiserror::Error;

/// Result type for the operator
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the operator
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API or watch error
    #[error("Kubernetes API error: {0}")]
    KubeError(String),

    /// Invalid controller configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A PrometheusRule could not be converted into rule groups
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A label selector could not be built
    #[error("Invalid label selector: {0}")]
    SelectorError(String),

    /// The ruler answered with a non-success status
    #[error("Ruler API error: {status}: {message}")]
    RulerError { status: u16, message: String },

    /// The ruler could not be reached or its response could not be read
    #[error("Ruler transport error: {0}")]
    TransportError(String),

    /// An operation exceeded its deadline
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The controller is shutting down
    #[error("Operation cancelled")]
    Cancelled,

    /// Several independent failures, one per remote namespace
    #[error("{}", join(.0))]
    Aggregate(Vec<Error>),
}

impl Error {
    /// Fold a list of errors into a single error, or `None` when the list is empty.
    pub fn aggregate(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Aggregate(errors)),
        }
    }
}

fn join(errors: &[Error]) -> String {
    let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    format!("{} errors occurred: {}", errors.len(), messages.join("; "))
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Error::KubeError(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::TransportError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_of_nothing_is_none() {
        assert!(Error::aggregate(vec![]).is_none());
    }

    #[test]
    fn aggregate_of_one_is_that_error() {
        let err = Error::aggregate(vec![Error::Cancelled]).unwrap();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn aggregate_lists_every_message() {
        let err = Error::aggregate(vec![
            Error::ConfigError("a".to_string()),
            Error::RulerError {
                status: 500,
                message: "b".to_string(),
            },
        ])
        .unwrap();

        let msg = err.to_string();
        assert!(msg.starts_with("2 errors occurred"));
        assert!(msg.contains("Configuration error: a"));
        assert!(msg.contains("Ruler API error: 500: b"));
    }
}
