//! Retry support for transient API failures.
//!
//! `RetryingClient` wraps any `ResourceClientTrait` implementation and
//! retries operations that fail with `ResourceClientError::Transient`,
//! sleeping with exponential backoff between attempts. Every other outcome,
//! including `NotFound` and `AlreadyExists`, is returned on the first try.

use crate::backoff::ExponentialBackoff;
use crate::error::ResourceClientError;
use crate::models::{DerivedKind, DerivedObject};
use crate::resource_trait::ResourceClientTrait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded retry configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap for the delay between retries
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Fresh backoff sequence for one operation
    #[must_use]
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.base_delay, self.max_delay)
    }
}

/// Run `operation`, retrying transient failures according to `policy`.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    description: &str,
    mut operation: F,
) -> Result<T, ResourceClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ResourceClientError>>,
{
    let mut backoff = policy.backoff();
    let mut attempt = 0;
    loop {
        match operation().await {
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = backoff.next_backoff();
                warn!(
                    operation = description,
                    attempt,
                    max_retries = policy.max_retries,
                    ?delay,
                    error = %e,
                    "Transient API failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}

/// Resource client decorator adding bounded retries
#[derive(Debug, Clone)]
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C> RetryingClient<C> {
    /// Wrap `inner` with `policy`
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait::async_trait]
impl<C: ResourceClientTrait> ResourceClientTrait for RetryingClient<C> {
    async fn get(
        &self,
        kind: DerivedKind,
        namespace: &str,
        name: &str,
    ) -> Result<DerivedObject, ResourceClientError> {
        let description = format!("get {kind} {namespace}/{name}");
        retry_transient(&self.policy, &description, || self.inner.get(kind, namespace, name)).await
    }

    async fn create(
        &self,
        namespace: &str,
        object: &DerivedObject,
    ) -> Result<DerivedObject, ResourceClientError> {
        let description = format!("create {} {}/{}", object.kind(), namespace, object.name());
        retry_transient(&self.policy, &description, || self.inner.create(namespace, object)).await
    }

    async fn delete(
        &self,
        kind: DerivedKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ResourceClientError> {
        let description = format!("delete {kind} {namespace}/{name}");
        retry_transient(&self.policy, &description, || self.inner.delete(kind, namespace, name)).await
    }
}
