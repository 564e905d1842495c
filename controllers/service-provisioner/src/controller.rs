//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the Deployment
//! watcher to the reconciler and drives startup through the initial cache
//! sync.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::watcher::{watch_events, WatchEvents, Watcher};
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client};
use kube_runtime::reflector::Store;
use kube_runtime::watcher;
use resource_client::ResourceClientTrait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Startup phase of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    /// Watch started (or about to start), cache not yet synced
    WatchingNotSynced,
    /// Initial sync completed, events are being reconciled
    Ready,
}

/// Main controller for Service provisioning.
pub struct Controller {
    watcher: Watcher<Deployment>,
    reconciler: Arc<Reconciler>,
    events: Option<WatchEvents<Deployment>>,
    phase: ControllerPhase,
}

impl Controller {
    /// Creates a controller consuming `events`.
    pub fn new(reconciler: Reconciler, events: WatchEvents<Deployment>, resync_period: Duration) -> Self {
        Self {
            watcher: Watcher::new("Deployment", resync_period),
            reconciler: Arc::new(reconciler),
            events: Some(events),
            phase: ControllerPhase::WatchingNotSynced,
        }
    }

    /// Creates a controller watching Deployments in `config.namespace`.
    pub fn for_namespace(
        kube_client: Client,
        client: Arc<dyn ResourceClientTrait>,
        config: &ControllerConfig,
    ) -> Self {
        info!("Initializing Service Provisioner for namespace {}", config.namespace);

        let deployments: Api<Deployment> = Api::namespaced(kube_client, &config.namespace);
        let events = watch_events(deployments, watcher::Config::default());
        let reconciler = Reconciler::new(client, config.matcher.clone(), config.template.clone());

        Self::new(reconciler, events, config.resync_period)
    }

    /// Starts the watch and waits for the initial cache sync.
    ///
    /// Returns once the controller is ready; reconciliation continues in the
    /// background until `cancel` fires.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), ControllerError> {
        let events = self
            .events
            .take()
            .ok_or_else(|| ControllerError::Watch("controller already started".to_string()))?;

        self.watcher.start(events, Arc::clone(&self.reconciler), cancel.clone())?;

        info!(
            "Waiting for Deployment cache to sync (selecting {})",
            self.reconciler.matcher()
        );
        if !self.watcher.wait_for_initial_sync(&cancel).await {
            error!("Deployment cache failed to sync");
            return Err(ControllerError::CacheSync(
                "Deployment cache did not complete its initial list".to_string(),
            ));
        }

        self.phase = ControllerPhase::Ready;
        info!("Service Provisioner ready");
        Ok(())
    }

    /// Current startup phase
    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    /// Event handler driving the derived resources
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Local Deployment cache
    pub fn store(&self) -> Store<Deployment> {
        self.watcher.store()
    }

    /// Joins the background tasks. Cancel the token passed to `run` first.
    pub async fn shutdown(mut self) {
        self.watcher.shutdown().await;
        info!("Service Provisioner stopped");
    }
}
