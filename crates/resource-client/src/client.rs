//! Kubernetes-backed resource client
//!
//! Implements `ResourceClientTrait` on top of `kube::Api` for Services and
//! ConfigMaps. Errors are classified by `ResourceClientError::from`.

use crate::error::ResourceClientError;
use crate::models::{DerivedKind, DerivedObject};
use crate::resource_trait::ResourceClientTrait;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use tracing::debug;

/// Resource client talking to the Kubernetes API server
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

impl std::fmt::Debug for KubeResourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeResourceClient").finish_non_exhaustive()
    }
}

impl KubeResourceClient {
    /// Create a new client from an authenticated kube client
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl ResourceClientTrait for KubeResourceClient {
    async fn get(
        &self,
        kind: DerivedKind,
        namespace: &str,
        name: &str,
    ) -> Result<DerivedObject, ResourceClientError> {
        debug!("GET {} {}/{}", kind, namespace, name);

        let object: DerivedObject = match kind {
            DerivedKind::Service => self.services(namespace).get(name).await?.into(),
            DerivedKind::ConfigMap => self.config_maps(namespace).get(name).await?.into(),
        };
        Ok(object)
    }

    async fn create(
        &self,
        namespace: &str,
        object: &DerivedObject,
    ) -> Result<DerivedObject, ResourceClientError> {
        if object.name().is_empty() {
            return Err(ResourceClientError::InvalidRequest(format!(
                "{} in namespace {} has no name",
                object.kind(),
                namespace
            )));
        }
        debug!("POST {} {}/{}", object.kind(), namespace, object.name());

        let pp = PostParams::default();
        let created: DerivedObject = match object {
            DerivedObject::Service(svc) => self.services(namespace).create(&pp, svc).await?.into(),
            DerivedObject::ConfigMap(cm) => self.config_maps(namespace).create(&pp, cm).await?.into(),
        };
        Ok(created)
    }

    async fn delete(
        &self,
        kind: DerivedKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ResourceClientError> {
        debug!("DELETE {} {}/{}", kind, namespace, name);

        // The API answers with either the object (deletion pending) or a
        // Status; both mean the delete was accepted.
        let dp = DeleteParams::default();
        match kind {
            DerivedKind::Service => {
                self.services(namespace).delete(name, &dp).await?;
            }
            DerivedKind::ConfigMap => {
                self.config_maps(namespace).delete(name, &dp).await?;
            }
        }
        Ok(())
    }
}
