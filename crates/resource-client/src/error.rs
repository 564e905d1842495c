//! Resource client errors

use thiserror::Error;

/// Errors that can occur when talking to the cluster API
#[derive(Debug, Error)]
pub enum ResourceClientError {
    /// Resource does not exist (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource with the same name already exists (HTTP 409)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Failure worth retrying: throttling, server errors, dropped connections
    #[error("Transient error: {0}")]
    Transient(String),

    /// API rejected the request
    #[error("API error ({code}): {message}")]
    Api {
        /// HTTP status code returned by the API server
        code: u16,
        /// Message from the returned `Status`
        message: String,
    },

    /// Request could not be built (e.g., object without a name)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Any other client-side failure
    #[error("Client error: {0}")]
    Other(String),
}

impl ResourceClientError {
    /// True when the resource was not found.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True when a create collided with an existing resource.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// True when the operation may succeed if retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// True when the API server refused a Service because its node port is
    /// held by another Service.
    #[must_use]
    pub fn is_node_port_conflict(&self) -> bool {
        matches!(self, Self::Api { code: 422, message } if message.contains("port is already allocated"))
    }
}

impl From<kube::Error> for ResourceClientError {
    fn from(err: kube::Error) -> Self {
        let message = err.to_string();
        match &err {
            kube::Error::Api(response) => match response.code {
                404 => Self::NotFound(message),
                409 => Self::AlreadyExists(message),
                429 | 500..=599 => Self::Transient(message),
                code => Self::Api { code, message },
            },
            kube::Error::HyperError(_) | kube::Error::Service(_) => Self::Transient(message),
            _ => Self::Other(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_helpers() {
        assert!(ResourceClientError::NotFound("svc".to_string()).is_not_found());
        assert!(ResourceClientError::AlreadyExists("svc".to_string()).is_already_exists());
        assert!(ResourceClientError::Transient("reset".to_string()).is_transient());

        let api = ResourceClientError::Api {
            code: 422,
            message: "provided port is already allocated".to_string(),
        };
        assert!(!api.is_transient());
        assert!(!api.is_not_found());
        assert!(!api.is_already_exists());
        assert!(api.is_node_port_conflict());
    }

    #[test]
    fn test_other_invalid_requests_are_not_port_conflicts() {
        let api = ResourceClientError::Api {
            code: 422,
            message: "spec.selector: Required value".to_string(),
        };
        assert!(!api.is_node_port_conflict());
        assert!(!ResourceClientError::Other("port is already allocated".to_string()).is_node_port_conflict());
    }

    #[test]
    fn test_display_includes_code() {
        let api = ResourceClientError::Api {
            code: 403,
            message: "forbidden".to_string(),
        };
        assert_eq!(api.to_string(), "API error (403): forbidden");
    }
}
