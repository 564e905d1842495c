//! Test utilities for unit testing the watcher and reconciler
//!
//! This module provides helpers for creating test Deployments and watch streams.

use crate::watcher::WatchEvents;
use futures::{stream, StreamExt};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube_runtime::watcher::Event;
use std::collections::BTreeMap;

/// Helper to create a test Deployment whose pods are selected by `app=<name>`
pub fn create_test_deployment(namespace: &str, name: &str, labels: &[(&str, &str)]) -> Deployment {
    let mut deployment = create_test_deployment_without_selector(namespace, name, labels);
    let pod_labels = BTreeMap::from([("app".to_string(), name.to_string())]);
    if let Some(spec) = deployment.spec.as_mut() {
        spec.selector = LabelSelector {
            match_labels: Some(pod_labels.clone()),
            ..Default::default()
        };
        spec.template.metadata = Some(ObjectMeta {
            labels: Some(pod_labels),
            ..Default::default()
        });
    }
    deployment
}

/// Helper to create a test Deployment with an empty selector
pub fn create_test_deployment_without_selector(
    namespace: &str,
    name: &str,
    labels: &[(&str, &str)],
) -> Deployment {
    let labels: BTreeMap<String, String> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: (!labels.is_empty()).then_some(labels),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector::default(),
            template: PodTemplateSpec::default(),
            ..Default::default()
        }),
        status: None,
    }
}

/// Helper to set the resource version, so tests can tell two states apart
pub fn with_resource_version(mut deployment: Deployment, version: &str) -> Deployment {
    deployment.metadata.resource_version = Some(version.to_string());
    deployment
}

/// Helper to build a watch stream that yields `events` and then stays open
pub fn watch_stream(events: Vec<Event<Deployment>>) -> WatchEvents<Deployment> {
    stream::iter(events.into_iter().map(Ok))
        .chain(stream::pending())
        .boxed()
}

/// Helper to build a watch stream that yields `events` and then ends
pub fn finite_watch_stream(events: Vec<Event<Deployment>>) -> WatchEvents<Deployment> {
    stream::iter(events.into_iter().map(Ok)).boxed()
}

/// Helper producing the events of an initial list of `deployments`
pub fn initial_list(deployments: Vec<Deployment>) -> Vec<Event<Deployment>> {
    let mut events = vec![Event::Init];
    events.extend(deployments.into_iter().map(Event::InitApply));
    events.push(Event::InitDone);
    events
}
