//! Reconciliation of derived resources for trigger Deployments.
//!
//! The reconciler is the single event handler of the Deployment watcher. For
//! every Deployment carrying the selection label it makes sure the derived
//! Service (and optional ConfigMap) exist, and it removes them again when the
//! Deployment goes away.
//!
//! Remote outcomes that already describe the desired state are not errors:
//! `AlreadyExists` on create and `NotFound` on get/delete are treated as
//! success. Transient failures are retried by the injected client; whatever
//! is left is logged and repaired by the next update or resync.
//!
//! A derived resource whose delete failed is remembered as pending deletion
//! and deleted again on every resync until the API confirms it is gone.

use crate::derived::DerivedTemplate;
use crate::error::ControllerError;
use crate::selector::LabelMatcher;
use crate::watcher::EventHandler;
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use resource_client::{DerivedKind, DerivedObject, ResourceClientError, ResourceClientTrait, ResourceRef};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Identity of a trigger Deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerKey {
    /// Namespace of the Deployment
    pub namespace: String,
    /// Name of the Deployment
    pub name: String,
}

impl TriggerKey {
    /// Key for the Deployment `namespace/name`.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of `deployment`. Objects without a namespace belong to `default`.
    pub fn of(deployment: &Deployment) -> Self {
        Self::new(
            deployment.namespace().unwrap_or_else(|| "default".to_string()),
            deployment.name_any(),
        )
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Default)]
struct Ownership {
    /// Derived resources provisioned per trigger
    owned: HashMap<TriggerKey, Vec<ResourceRef>>,
    /// Derived resources whose delete failed
    pending_deletion: BTreeSet<ResourceRef>,
}

/// Drives the lifecycle of derived resources.
pub struct Reconciler {
    client: Arc<dyn ResourceClientTrait>,
    matcher: LabelMatcher,
    template: DerivedTemplate,
    /// Held for the whole of each handler call.
    state: Mutex<Ownership>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("matcher", &self.matcher)
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Reconciler that provisions `template` through `client` for every
    /// Deployment selected by `matcher`.
    pub fn new(client: Arc<dyn ResourceClientTrait>, matcher: LabelMatcher, template: DerivedTemplate) -> Self {
        Self {
            client,
            matcher,
            template,
            state: Mutex::new(Ownership::default()),
        }
    }

    /// Predicate selecting trigger Deployments.
    pub fn matcher(&self) -> &LabelMatcher {
        &self.matcher
    }

    /// Derived resources recorded for `namespace/name`, if any
    #[cfg(test)]
    pub async fn owned_by(&self, namespace: &str, name: &str) -> Option<Vec<ResourceRef>> {
        self.state.lock().await.owned.get(&TriggerKey::new(namespace, name)).cloned()
    }

    /// Number of triggers with a recorded derived set
    pub async fn tracked_count(&self) -> usize {
        self.state.lock().await.owned.len()
    }

    /// Number of derived resources still waiting for a successful delete
    pub async fn pending_deletions(&self) -> usize {
        self.state.lock().await.pending_deletion.len()
    }

    /// Ensure every derived resource of `trigger` exists.
    ///
    /// With `check_existing`, each resource is looked up first and only the
    /// missing ones are created. Returns the full derived set on success.
    async fn provision(
        &self,
        trigger: &Deployment,
        key: &TriggerKey,
        check_existing: bool,
    ) -> Result<Vec<ResourceRef>, ControllerError> {
        let refs = self.template.refs_for(&key.namespace, &key.name);

        for target in &refs {
            if check_existing {
                match self.client.get(target.kind, &target.namespace, &target.name).await {
                    Ok(_) => {
                        debug!("{} exists for {}", target, key);
                        continue;
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
            }

            let object = self.template.build(trigger, target)?;
            match self.create(key, target, &object).await {
                Err(e) if e.is_node_port_conflict() && target.kind == DerivedKind::Service => {
                    warn!(
                        kind = %target.kind,
                        namespace = %target.namespace,
                        name = %target.name,
                        action = "node_port_assigned",
                        "Node port of {} is held by another Service, letting the API server assign one",
                        target
                    );
                    let object = self.template.build_with_assigned_node_port(trigger, target)?;
                    self.create(key, target, &object).await?;
                }
                result => result?,
            }
        }

        Ok(refs)
    }

    /// Create one derived object. `AlreadyExists` counts as created.
    async fn create(
        &self,
        key: &TriggerKey,
        target: &ResourceRef,
        object: &DerivedObject,
    ) -> Result<(), ResourceClientError> {
        match self.client.create(&target.namespace, object).await {
            Ok(_) => info!(
                kind = %target.kind,
                namespace = %target.namespace,
                name = %target.name,
                action = "created",
                "Created {} for Deployment {}",
                target.kind,
                key
            ),
            Err(e) if e.is_already_exists() => debug!(
                kind = %target.kind,
                namespace = %target.namespace,
                name = %target.name,
                action = "exists",
                "{} already exists",
                target
            ),
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Delete `refs`. Missing resources count as deleted. Returns the ones
    /// whose deletion failed.
    async fn remove(&self, refs: &[ResourceRef]) -> Vec<ResourceRef> {
        let mut failed = Vec::new();
        for target in refs {
            match self.client.delete(target.kind, &target.namespace, &target.name).await {
                Ok(()) => info!(
                    kind = %target.kind,
                    namespace = %target.namespace,
                    name = %target.name,
                    action = "deleted",
                    "Deleted {}",
                    target
                ),
                Err(e) if e.is_not_found() => debug!(
                    kind = %target.kind,
                    namespace = %target.namespace,
                    name = %target.name,
                    action = "absent",
                    "{} already gone",
                    target
                ),
                Err(e) => {
                    error!(
                        kind = %target.kind,
                        namespace = %target.namespace,
                        name = %target.name,
                        action = "delete_failed",
                        "Failed to delete {}: {}",
                        target,
                        e
                    );
                    failed.push(target.clone());
                }
            }
        }
        failed
    }

    /// Record a successful provision. Its resources are no longer up for
    /// deletion.
    fn track(state: &mut Ownership, key: TriggerKey, refs: Vec<ResourceRef>) {
        for target in &refs {
            state.pending_deletion.remove(target);
        }
        state.owned.insert(key, refs);
    }
}

#[async_trait::async_trait]
impl EventHandler<Deployment> for Reconciler {
    async fn on_added(&self, resource: Arc<Deployment>) {
        if !self.matcher.matches(resource.as_ref()) {
            debug!("Ignoring added Deployment {} (no {} label)", TriggerKey::of(&resource), self.matcher);
            return;
        }

        let key = TriggerKey::of(&resource);
        let mut state = self.state.lock().await;
        if state.owned.contains_key(&key) {
            debug!("Deployment {} already provisioned", key);
            return;
        }

        match self.provision(&resource, &key, false).await {
            Ok(refs) => Self::track(&mut state, key, refs),
            Err(e) => error!("Failed to provision resources for Deployment {}: {}", key, e),
        }
    }

    async fn on_updated(&self, _old: Arc<Deployment>, new: Arc<Deployment>) {
        let key = TriggerKey::of(&new);
        if !self.matcher.matches(new.as_ref()) {
            debug!("Ignoring updated Deployment {} (no {} label)", key, self.matcher);
            return;
        }

        let mut state = self.state.lock().await;
        match self.provision(&new, &key, true).await {
            Ok(refs) => Self::track(&mut state, key, refs),
            Err(e) => error!("Failed to reconcile resources for Deployment {}: {}", key, e),
        }
    }

    async fn on_deleted(&self, resource: Arc<Deployment>) {
        let key = TriggerKey::of(&resource);
        let mut state = self.state.lock().await;

        let refs = match state.owned.remove(&key) {
            Some(refs) => refs,
            None if self.matcher.matches(resource.as_ref()) => {
                self.template.refs_for(&key.namespace, &key.name)
            }
            None => {
                debug!("Ignoring deleted Deployment {} (not provisioned)", key);
                return;
            }
        };

        let failed = self.remove(&refs).await;
        if !failed.is_empty() {
            warn!(
                "{} derived resource(s) of Deployment {} could not be deleted, retrying on resync",
                failed.len(),
                key
            );
            state.pending_deletion.extend(failed);
        }
    }

    async fn on_resync(&self) {
        let mut state = self.state.lock().await;
        if state.pending_deletion.is_empty() {
            return;
        }

        let pending: Vec<ResourceRef> = std::mem::take(&mut state.pending_deletion).into_iter().collect();
        debug!("Retrying deletion of {} derived resource(s)", pending.len());
        let failed = self.remove(&pending).await;
        if !failed.is_empty() {
            warn!("{} derived resource(s) still pending deletion", failed.len());
        }
        state.pending_deletion.extend(failed);
    }
}
