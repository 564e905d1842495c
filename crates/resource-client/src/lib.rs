//! Resource Client
//!
//! Get/create/delete access to the namespaced resources the service
//! provisioner derives from a watched Deployment (`Service`, `ConfigMap`).
//!
//! # Example
//!
//! ```no_run
//! use resource_client::{DerivedKind, KubeResourceClient, ResourceClientTrait, RetryPolicy, RetryingClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let kube_client = kube::Client::try_default().await?;
//! let client = RetryingClient::new(KubeResourceClient::new(kube_client), RetryPolicy::default());
//!
//! match client.get(DerivedKind::Service, "default", "app1-svc").await {
//!     Ok(svc) => println!("found {}", svc.name()),
//!     Err(e) if e.is_not_found() => println!("not provisioned yet"),
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Typed outcomes**: `NotFound` and `AlreadyExists` are distinguishable
//!   from real failures so callers can treat them as expected results
//! - **Retry Logic**: `RetryingClient` retries transient failures with
//!   exponential backoff
//! - **Mocking**: `MockResourceClient` (feature `test-util`) keeps objects in
//!   memory and records every call

pub mod backoff;
pub mod client;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod models;
#[path = "trait.rs"]
pub mod resource_trait;
pub mod retry;

pub use backoff::ExponentialBackoff;
pub use client::KubeResourceClient;
pub use error::ResourceClientError;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{ClientCall, MockResourceClient};
pub use models::*;
pub use resource_trait::ResourceClientTrait;
pub use retry::{RetryPolicy, RetryingClient};
