use thiserror::Error;

use crate::domain::request::RequestStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid request transition from {from:?} to {to:?}")]
    InvalidRequestTransition { from: RequestStatus, to: RequestStatus },
    #[error("unknown worker `{0}`")]
    UnknownWorker(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl ApplicationError {
    /// Stable class name used in log entries and CLI payloads.
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Domain(DomainError::InvalidRequestTransition { .. }) => "invalid_transition",
            Self::Domain(DomainError::UnknownWorker(_)) => "unknown_worker",
            Self::Persistence(_) => "persistence",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::request::RequestStatus;
    use crate::errors::{ApplicationError, DomainError};

    #[test]
    fn domain_errors_keep_their_class_through_application_layer() {
        let error = ApplicationError::from(DomainError::UnknownWorker("legal-agent".to_owned()));
        assert_eq!(error.error_class(), "unknown_worker");
        assert_eq!(error.to_string(), "unknown worker `legal-agent`");
    }

    #[test]
    fn transition_error_names_both_states() {
        let error = DomainError::InvalidRequestTransition {
            from: RequestStatus::Completed,
            to: RequestStatus::Processing,
        };
        let message = error.to_string();
        assert!(message.contains("Completed"));
        assert!(message.contains("Processing"));
    }

    #[test]
    fn persistence_error_has_persistence_class() {
        let error = ApplicationError::Persistence("store unavailable".to_owned());
        assert_eq!(error.error_class(), "persistence");
    }
}
