//! Mock ResourceClient for unit testing
//!
//! This module provides a mock implementation of `ResourceClientTrait` that
//! can be used in unit tests without a running cluster.
//!
//! The mock stores objects in memory, records every call it receives, and can
//! be told to fail upcoming calls with a given error.

use crate::error::ResourceClientError;
use crate::models::{DerivedKind, DerivedObject, ResourceRef};
use crate::resource_trait::ResourceClientTrait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A call received by the mock, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCall {
    /// `get`
    Get(ResourceRef),
    /// `create`
    Create(ResourceRef),
    /// `delete`
    Delete(ResourceRef),
}

/// Mock ResourceClient for testing
///
/// Clones share the same storage, so a test can hand one clone to the code
/// under test and inspect another.
#[derive(Debug, Clone, Default)]
pub struct MockResourceClient {
    objects: Arc<Mutex<BTreeMap<ResourceRef, DerivedObject>>>,
    calls: Arc<Mutex<Vec<ClientCall>>>,
    failures: Arc<Mutex<VecDeque<ResourceClientError>>>,
    next_version: Arc<Mutex<u64>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockResourceClient {
    /// Create an empty mock client
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object to the mock store without recording a call (for test setup)
    pub fn insert(&self, namespace: &str, mut object: DerivedObject) {
        object.metadata_mut().namespace = Some(namespace.to_string());
        let key = object.to_ref(namespace);
        lock(&self.objects).insert(key, object);
    }

    /// Make the next call fail with `error`. Queued errors are consumed in order.
    pub fn fail_next(&self, error: ResourceClientError) {
        lock(&self.failures).push_back(error);
    }

    /// Whether an object with this identity is stored
    #[must_use]
    pub fn contains(&self, kind: DerivedKind, namespace: &str, name: &str) -> bool {
        lock(&self.objects).contains_key(&ResourceRef::new(kind, namespace, name))
    }

    /// Stored object, if present
    #[must_use]
    pub fn object(&self, kind: DerivedKind, namespace: &str, name: &str) -> Option<DerivedObject> {
        lock(&self.objects)
            .get(&ResourceRef::new(kind, namespace, name))
            .cloned()
    }

    /// All stored objects of `kind`, ordered by namespace and name
    #[must_use]
    pub fn objects_of(&self, kind: DerivedKind) -> Vec<DerivedObject> {
        lock(&self.objects)
            .iter()
            .filter(|(key, _)| key.kind == kind)
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    /// Every call received so far
    #[must_use]
    pub fn calls(&self) -> Vec<ClientCall> {
        lock(&self.calls).clone()
    }

    /// Number of calls received so far
    #[must_use]
    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Number of `create` calls received so far
    #[must_use]
    pub fn create_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| matches!(call, ClientCall::Create(_)))
            .count()
    }

    /// Forget recorded calls, keeping stored objects
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, call: ClientCall) -> Result<(), ResourceClientError> {
        lock(&self.calls).push(call);
        match lock(&self.failures).pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn next_version(&self) -> String {
        let mut version = lock(&self.next_version);
        *version += 1;
        version.to_string()
    }
}

fn node_ports(object: &DerivedObject) -> Vec<i32> {
    match object {
        DerivedObject::Service(svc) => svc
            .spec
            .iter()
            .flat_map(|spec| spec.ports.iter().flatten())
            .filter_map(|port| port.node_port)
            .collect(),
        DerivedObject::ConfigMap(_) => Vec::new(),
    }
}

#[async_trait::async_trait]
impl ResourceClientTrait for MockResourceClient {
    async fn get(
        &self,
        kind: DerivedKind,
        namespace: &str,
        name: &str,
    ) -> Result<DerivedObject, ResourceClientError> {
        let key = ResourceRef::new(kind, namespace, name);
        self.record(ClientCall::Get(key.clone()))?;

        lock(&self.objects)
            .get(&key)
            .cloned()
            .ok_or_else(|| ResourceClientError::NotFound(format!("{key} not found")))
    }

    async fn create(
        &self,
        namespace: &str,
        object: &DerivedObject,
    ) -> Result<DerivedObject, ResourceClientError> {
        let key = ResourceRef::new(object.kind(), namespace, object.name());
        self.record(ClientCall::Create(key.clone()))?;

        if key.name.is_empty() {
            return Err(ResourceClientError::InvalidRequest(format!(
                "{} in namespace {} has no name",
                key.kind, namespace
            )));
        }

        let mut objects = lock(&self.objects);
        if objects.contains_key(&key) {
            return Err(ResourceClientError::AlreadyExists(format!("{key} already exists")));
        }
        // Node ports are allocated cluster-wide, as the API server does
        if let Some(port) = node_ports(object)
            .into_iter()
            .find(|port| objects.values().any(|stored| node_ports(stored).contains(port)))
        {
            return Err(ResourceClientError::Api {
                code: 422,
                message: format!(
                    "Service \"{}\" is invalid: spec.ports[0].nodePort: Invalid value: {port}: provided port is already allocated",
                    key.name
                ),
            });
        }

        let mut stored = object.clone();
        let metadata = stored.metadata_mut();
        metadata.namespace = Some(namespace.to_string());
        metadata.resource_version = Some(self.next_version());
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(
        &self,
        kind: DerivedKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ResourceClientError> {
        let key = ResourceRef::new(kind, namespace, name);
        self.record(ClientCall::Delete(key.clone()))?;

        lock(&self.objects)
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| ResourceClientError::NotFound(format!("{key} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn config_map(name: &str) -> DerivedObject {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
        .into()
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let mock = MockResourceClient::new();

        let created = mock.create("default", &config_map("app1-config")).await;
        assert!(created.is_ok());

        let fetched = mock.get(DerivedKind::ConfigMap, "default", "app1-config").await;
        let Ok(fetched) = fetched else {
            panic!("ConfigMap should exist after create");
        };
        assert_eq!(fetched.namespace(), Some("default"));
        assert!(fetched.metadata().resource_version.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_create_reports_already_exists() {
        let mock = MockResourceClient::new();
        mock.insert("default", config_map("app1-config"));

        let result = mock.create("default", &config_map("app1-config")).await;

        assert!(matches!(result, Err(ResourceClientError::AlreadyExists(_))));
        assert_eq!(mock.objects_of(DerivedKind::ConfigMap).len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_reports_not_found() {
        let mock = MockResourceClient::new();

        let result = mock.delete(DerivedKind::Service, "default", "gone").await;

        assert!(matches!(result, Err(ResourceClientError::NotFound(_))));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let mock = MockResourceClient::new();
        mock.fail_next(ResourceClientError::Transient("boom".to_string()));

        let first = mock.create("default", &config_map("a")).await;
        let second = mock.create("default", &config_map("a")).await;

        assert!(matches!(first, Err(ResourceClientError::Transient(_))));
        assert!(second.is_ok());
        assert_eq!(mock.create_count(), 2);
    }

    #[tokio::test]
    async fn test_node_port_is_allocated_once() {
        let mock = MockResourceClient::new();
        let with_node_port = |name: &str| -> DerivedObject {
            Service {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
                spec: Some(ServiceSpec {
                    ports: Some(vec![ServicePort {
                        port: 80,
                        node_port: Some(30010),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            }
            .into()
        };

        let first = mock.create("default", &with_node_port("app1-svc")).await;
        let second = mock.create("staging", &with_node_port("app2-svc")).await;

        assert!(first.is_ok());
        assert!(matches!(second, Err(ref e) if e.is_node_port_conflict()));
        assert!(!mock.contains(DerivedKind::Service, "staging", "app2-svc"));
    }

    #[tokio::test]
    async fn test_objects_are_scoped_by_namespace() {
        let mock = MockResourceClient::new();
        mock.insert("team-a", config_map("shared"));

        assert!(mock.contains(DerivedKind::ConfigMap, "team-a", "shared"));
        assert!(!mock.contains(DerivedKind::ConfigMap, "team-b", "shared"));
        assert!(mock.calls().is_empty());
    }
}
