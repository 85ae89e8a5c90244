//! Error types for the search cluster operator

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A required reconciliation parameter or spec field is missing or invalid
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Kind, namespace or name could not be derived from a resource
    #[error("Cannot derive resource identity: {0}")]
    IdentityError(String),

    /// The controller owner reference could not be stamped
    #[error("Cannot set owner reference on {kind} {namespace}/{name}: {reason}")]
    OwnershipError {
        kind: String,
        namespace: String,
        name: String,
        reason: String,
    },

    /// Platform call failed, with the identity of the resource involved
    #[error("failed to {operation} {kind} {namespace}/{name}: {source}")]
    IoError {
        operation: &'static str,
        kind: String,
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    /// Platform failures are worth another attempt on the next requeue;
    /// programming and spec errors are not.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::KubeError(_) | Error::IoError { .. })
    }

    /// True when the platform rejected a write because the record changed
    /// since it was read.
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    fn api_code(&self) -> Option<u16> {
        match self {
            Error::KubeError(kube::Error::Api(e)) => Some(e.code),
            Error::IoError {
                source: kube::Error::Api(e),
                ..
            } => Some(e.code),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn test_conflict_is_retriable() {
        let err = Error::KubeError(api_error(409));
        assert!(err.is_conflict());
        assert!(err.is_retriable());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_io_error_carries_identity() {
        let err = Error::IoError {
            operation: "get",
            kind: "Service".to_string(),
            namespace: "ns".to_string(),
            name: "es-http".to_string(),
            source: api_error(500),
        };
        assert!(err.is_retriable());
        assert!(err.to_string().starts_with("failed to get Service ns/es-http"));
    }

    #[test]
    fn test_not_found_seen_through_io_error() {
        assert!(Error::KubeError(api_error(404)).is_not_found());
        let err = Error::IoError {
            operation: "get",
            kind: "Endpoints".to_string(),
            namespace: "ns".to_string(),
            name: "es-http".to_string(),
            source: api_error(404),
        };
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_validation_error_not_retriable() {
        let err = Error::ValidationError("Expected must be set".to_string());
        assert!(!err.is_retriable());
        assert!(!err.is_conflict());
    }
}
