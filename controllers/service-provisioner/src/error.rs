//! Controller-specific error types.
//!
//! This module defines the errors that stop the Service Provisioner. Expected
//! API outcomes (`NotFound`, `AlreadyExists`) are absorbed by the reconciler
//! and never become a `ControllerError`.

use thiserror::Error;
use kube::Error as KubeError;
use resource_client::ResourceClientError;

/// Errors that can occur in the Service Provisioner.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Derived resource API error
    #[error("Resource client error: {0}")]
    Client(#[from] ResourceClientError),

    /// Credentials could not be resolved
    #[error("Failed to resolve cluster credentials: {0}")]
    Credentials(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Trigger resource cannot be turned into derived resources
    #[error("Invalid trigger resource: {0}")]
    InvalidTrigger(String),

    /// Local cache never completed its initial list
    #[error("Failed to sync cache: {0}")]
    CacheSync(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
