//! Resource kinds and object wrappers handled by the client.

use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::fmt;

/// Kind of resource the provisioner derives from a Deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DerivedKind {
    /// `v1/Service`
    Service,
    /// `v1/ConfigMap`
    ConfigMap,
}

impl DerivedKind {
    /// Kubernetes kind name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Service => "Service",
            Self::ConfigMap => "ConfigMap",
        }
    }
}

impl fmt::Display for DerivedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete derived object, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum DerivedObject {
    /// Exposed endpoint for the Deployment's pods
    Service(Service),
    /// Auxiliary key-value configuration
    ConfigMap(ConfigMap),
}

impl DerivedObject {
    /// Kind of the wrapped object
    #[must_use]
    pub fn kind(&self) -> DerivedKind {
        match self {
            Self::Service(_) => DerivedKind::Service,
            Self::ConfigMap(_) => DerivedKind::ConfigMap,
        }
    }

    /// Object metadata
    #[must_use]
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Service(svc) => &svc.metadata,
            Self::ConfigMap(cm) => &cm.metadata,
        }
    }

    /// Mutable object metadata
    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Service(svc) => &mut svc.metadata,
            Self::ConfigMap(cm) => &mut cm.metadata,
        }
    }

    /// Object name, empty when unset
    #[must_use]
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Object namespace, if set
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    /// Reference to this object, falling back to `namespace` when the
    /// object carries none
    #[must_use]
    pub fn to_ref(&self, namespace: &str) -> ResourceRef {
        ResourceRef::new(
            self.kind(),
            self.namespace().unwrap_or(namespace),
            self.name(),
        )
    }
}

impl From<Service> for DerivedObject {
    fn from(svc: Service) -> Self {
        Self::Service(svc)
    }
}

impl From<ConfigMap> for DerivedObject {
    fn from(cm: ConfigMap) -> Self {
        Self::ConfigMap(cm)
    }
}

/// Identity of a derived resource: kind, namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    /// Resource kind
    pub kind: DerivedKind,
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl ResourceRef {
    /// Create a new reference
    pub fn new(kind: DerivedKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}
