//! Builders for the resources derived from a trigger Deployment.
//!
//! A qualifying Deployment `<ns>/<name>` yields a Service `<ns>/<name><suffix>`
//! selecting the Deployment's pods and, when enabled, a ConfigMap
//! `<ns>/<name><config suffix>`. Names are deterministic so a restarted
//! controller finds what an earlier instance created.

use crate::error::ControllerError;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use resource_client::{DerivedKind, DerivedObject, ResourceRef};
use std::collections::BTreeMap;

/// Label marking objects created by this controller
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY_VALUE: &str = "service-provisioner";
/// Label naming the Deployment an object was derived from
pub const TRIGGER_LABEL: &str = "service-provisioner/trigger";

/// Shape of the derived Service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTemplate {
    /// Appended to the Deployment name
    pub name_suffix: String,
    /// Name of the single exposed port
    pub port_name: String,
    /// Service port
    pub port: i32,
    /// Container port traffic is forwarded to
    pub target_port: i32,
    /// Fixed node port; `None` yields a ClusterIP Service
    pub node_port: Option<i32>,
}

impl Default for ServiceTemplate {
    fn default() -> Self {
        Self {
            name_suffix: "-svc".to_string(),
            port_name: "http".to_string(),
            port: 80,
            target_port: 80,
            node_port: Some(30010),
        }
    }
}

/// Shape of the auxiliary ConfigMap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigMapTemplate {
    /// Appended to the Deployment name
    pub name_suffix: String,
    /// ConfigMap data
    pub data: BTreeMap<String, String>,
}

impl Default for ConfigMapTemplate {
    fn default() -> Self {
        Self {
            name_suffix: "-config".to_string(),
            data: BTreeMap::from([("foo".to_string(), "bar".to_string())]),
        }
    }
}

/// Everything needed to derive resources from a Deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedTemplate {
    /// Service shape
    pub service: ServiceTemplate,
    /// ConfigMap shape, when the ConfigMap variant is enabled
    pub config_map: Option<ConfigMapTemplate>,
    /// Labels stamped on every derived object (besides the managed-by labels)
    pub labels: BTreeMap<String, String>,
}

impl Default for DerivedTemplate {
    fn default() -> Self {
        Self {
            service: ServiceTemplate::default(),
            config_map: None,
            labels: BTreeMap::from([("ntcu-k8s".to_string(), "hw3".to_string())]),
        }
    }
}

impl DerivedTemplate {
    /// Identities of the objects derived from `<namespace>/<trigger_name>`,
    /// Service first.
    pub fn refs_for(&self, namespace: &str, trigger_name: &str) -> Vec<ResourceRef> {
        let mut refs = vec![ResourceRef::new(
            DerivedKind::Service,
            namespace,
            format!("{trigger_name}{}", self.service.name_suffix),
        )];
        if let Some(cm) = &self.config_map {
            refs.push(ResourceRef::new(
                DerivedKind::ConfigMap,
                namespace,
                format!("{trigger_name}{}", cm.name_suffix),
            ));
        }
        refs
    }

    /// Build the derived object identified by `target` for `trigger`.
    pub fn build(&self, trigger: &Deployment, target: &ResourceRef) -> Result<DerivedObject, ControllerError> {
        self.build_object(trigger, target, self.service.node_port)
    }

    /// Like [`DerivedTemplate::build`], but a NodePort Service leaves the
    /// node port for the API server to assign. Used when the configured port
    /// is already held by another Service.
    pub fn build_with_assigned_node_port(
        &self,
        trigger: &Deployment,
        target: &ResourceRef,
    ) -> Result<DerivedObject, ControllerError> {
        self.build_object(trigger, target, None)
    }

    fn build_object(
        &self,
        trigger: &Deployment,
        target: &ResourceRef,
        node_port: Option<i32>,
    ) -> Result<DerivedObject, ControllerError> {
        let metadata = ObjectMeta {
            name: Some(target.name.clone()),
            namespace: Some(target.namespace.clone()),
            labels: Some(self.labels_for(&trigger.name_any())),
            ..Default::default()
        };

        match target.kind {
            DerivedKind::Service => self.build_service(trigger, metadata, node_port).map(DerivedObject::from),
            DerivedKind::ConfigMap => {
                let data = self
                    .config_map
                    .as_ref()
                    .map(|cm| cm.data.clone())
                    .unwrap_or_default();
                Ok(ConfigMap {
                    metadata,
                    data: Some(data),
                    ..Default::default()
                }
                .into())
            }
        }
    }

    fn build_service(
        &self,
        trigger: &Deployment,
        metadata: ObjectMeta,
        node_port: Option<i32>,
    ) -> Result<Service, ControllerError> {
        let selector = trigger
            .spec
            .as_ref()
            .and_then(|spec| spec.selector.match_labels.clone())
            .filter(|labels| !labels.is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidTrigger(format!(
                    "Deployment {}/{} has no spec.selector.matchLabels",
                    trigger.namespace().unwrap_or_default(),
                    trigger.name_any()
                ))
            })?;

        let template = &self.service;
        let service_type = if template.node_port.is_some() { "NodePort" } else { "ClusterIP" };

        Ok(Service {
            metadata,
            spec: Some(ServiceSpec {
                type_: Some(service_type.to_string()),
                selector: Some(selector),
                ports: Some(vec![ServicePort {
                    name: Some(template.port_name.clone()),
                    port: template.port,
                    target_port: Some(IntOrString::Int(template.target_port)),
                    node_port,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn labels_for(&self, trigger_name: &str) -> BTreeMap<String, String> {
        let mut labels = self.labels.clone();
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
        labels.insert(TRIGGER_LABEL.to_string(), trigger_name.to_string());
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_deployment, create_test_deployment_without_selector};

    #[test]
    fn test_refs_for_service_only() {
        let template = DerivedTemplate::default();

        let refs = template.refs_for("default", "app1");

        assert_eq!(refs, vec![ResourceRef::new(DerivedKind::Service, "default", "app1-svc")]);
    }

    #[test]
    fn test_refs_for_with_config_map() {
        let template = DerivedTemplate {
            config_map: Some(ConfigMapTemplate::default()),
            ..Default::default()
        };

        let refs = template.refs_for("apps", "web");

        assert_eq!(
            refs,
            vec![
                ResourceRef::new(DerivedKind::Service, "apps", "web-svc"),
                ResourceRef::new(DerivedKind::ConfigMap, "apps", "web-config"),
            ]
        );
    }

    #[test]
    fn test_build_service_copies_selector_and_ports() {
        let template = DerivedTemplate::default();
        let deployment = create_test_deployment("default", "app1", &[("ntcu-k8s", "hw3")]);
        let target = ResourceRef::new(DerivedKind::Service, "default", "app1-svc");

        let Ok(DerivedObject::Service(svc)) = template.build(&deployment, &target) else {
            panic!("expected a Service");
        };

        assert_eq!(svc.metadata.namespace.as_deref(), Some("default"));
        let labels = svc.metadata.labels.clone().unwrap_or_default();
        assert_eq!(labels.get("ntcu-k8s").map(String::as_str), Some("hw3"));
        assert_eq!(labels.get(TRIGGER_LABEL).map(String::as_str), Some("app1"));
        assert_eq!(labels.get(MANAGED_BY_LABEL).map(String::as_str), Some(MANAGED_BY_VALUE));

        let spec = svc.spec.unwrap_or_default();
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        assert_eq!(
            spec.selector,
            Some(BTreeMap::from([("app".to_string(), "app1".to_string())]))
        );
        let ports = spec.ports.unwrap_or_default();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, 80);
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(80)));
        assert_eq!(ports[0].node_port, Some(30010));
        assert_eq!(ports[0].protocol.as_deref(), Some("TCP"));
    }

    #[test]
    fn test_build_cluster_ip_without_node_port() {
        let template = DerivedTemplate {
            service: ServiceTemplate {
                node_port: None,
                ..Default::default()
            },
            ..Default::default()
        };
        let deployment = create_test_deployment("default", "app1", &[]);
        let target = ResourceRef::new(DerivedKind::Service, "default", "app1-svc");

        let Ok(DerivedObject::Service(svc)) = template.build(&deployment, &target) else {
            panic!("expected a Service");
        };

        assert_eq!(svc.spec.and_then(|s| s.type_).as_deref(), Some("ClusterIP"));
    }

    #[test]
    fn test_build_with_assigned_node_port_keeps_type() {
        let template = DerivedTemplate::default();
        let deployment = create_test_deployment("default", "app2", &[("ntcu-k8s", "hw3")]);
        let target = ResourceRef::new(DerivedKind::Service, "default", "app2-svc");

        let Ok(DerivedObject::Service(svc)) = template.build_with_assigned_node_port(&deployment, &target) else {
            panic!("expected a Service");
        };

        let spec = svc.spec.unwrap_or_default();
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        let ports = spec.ports.unwrap_or_default();
        assert_eq!(ports[0].port, 80);
        assert_eq!(ports[0].node_port, None);
    }

    #[test]
    fn test_build_service_requires_selector() {
        let template = DerivedTemplate::default();
        let deployment = create_test_deployment_without_selector("default", "app1", &[("ntcu-k8s", "hw3")]);
        let target = ResourceRef::new(DerivedKind::Service, "default", "app1-svc");

        let result = template.build(&deployment, &target);

        assert!(matches!(result, Err(ControllerError::InvalidTrigger(_))));
    }

    #[test]
    fn test_build_config_map_data() {
        let template = DerivedTemplate {
            config_map: Some(ConfigMapTemplate::default()),
            ..Default::default()
        };
        let deployment = create_test_deployment("default", "app1", &[]);
        let target = ResourceRef::new(DerivedKind::ConfigMap, "default", "app1-config");

        let Ok(DerivedObject::ConfigMap(cm)) = template.build(&deployment, &target) else {
            panic!("expected a ConfigMap");
        };

        assert_eq!(cm.metadata.name.as_deref(), Some("app1-config"));
        assert_eq!(
            cm.data,
            Some(BTreeMap::from([("foo".to_string(), "bar".to_string())]))
        );
    }
}
