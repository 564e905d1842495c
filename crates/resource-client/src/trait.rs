//! ResourceClient trait for mocking
//!
//! This trait abstracts the cluster API calls the reconciler makes so that
//! tests can substitute an in-memory implementation.

use crate::error::ResourceClientError;
use crate::models::{DerivedKind, DerivedObject};

/// Trait for named, namespaced resource operations
///
/// `NotFound` and `AlreadyExists` are reported as distinct error variants so
/// callers can treat them as expected outcomes.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ResourceClientTrait: Send + Sync {
    /// Fetch a resource by name.
    async fn get(
        &self,
        kind: DerivedKind,
        namespace: &str,
        name: &str,
    ) -> Result<DerivedObject, ResourceClientError>;

    /// Create a resource in `namespace`, returning the stored object.
    async fn create(
        &self,
        namespace: &str,
        object: &DerivedObject,
    ) -> Result<DerivedObject, ResourceClientError>;

    /// Delete a resource by name.
    async fn delete(
        &self,
        kind: DerivedKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ResourceClientError>;
}
