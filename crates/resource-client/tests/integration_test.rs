//! Integration tests for the Kubernetes-backed resource client
//!
//! These tests require a reachable cluster (current kubeconfig context).
//! Set TEST_NAMESPACE to choose the namespace (default: "default").

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use resource_client::{DerivedKind, DerivedObject, KubeResourceClient, ResourceClientTrait};
use std::collections::BTreeMap;

fn namespace() -> String {
    std::env::var("TEST_NAMESPACE").unwrap_or_else(|_| "default".to_string())
}

async fn client() -> KubeResourceClient {
    let kube_client = kube::Client::try_default()
        .await
        .expect("Failed to create Kubernetes client");
    KubeResourceClient::new(kube_client)
}

#[tokio::test]
#[ignore] // Requires running cluster
async fn test_get_missing_is_not_found() {
    let client = client().await;

    let result = client
        .get(DerivedKind::Service, &namespace(), "resource-client-it-missing")
        .await;

    assert!(matches!(result, Err(e) if e.is_not_found()));
}

#[tokio::test]
#[ignore] // Requires running cluster
async fn test_config_map_lifecycle() {
    let client = client().await;
    let ns = namespace();
    let name = "resource-client-it-config";

    let object = DerivedObject::from(ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([("foo".to_string(), "bar".to_string())])),
        ..Default::default()
    });

    client.create(&ns, &object).await.expect("Failed to create ConfigMap");

    let duplicate = client.create(&ns, &object).await;
    assert!(matches!(duplicate, Err(e) if e.is_already_exists()));

    client
        .delete(DerivedKind::ConfigMap, &ns, name)
        .await
        .expect("Failed to delete ConfigMap");

    let second_delete = client.delete(DerivedKind::ConfigMap, &ns, name).await;
    assert!(matches!(second_delete, Err(e) if e.is_not_found()));
}
