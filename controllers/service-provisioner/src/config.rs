//! Command line and environment configuration.
//!
//! Every flag can also be set through the environment variable named in its
//! `env` attribute. Raw arguments are checked by [`Args::into_config`] before
//! anything talks to the cluster.

use crate::derived::{ConfigMapTemplate, DerivedTemplate, ServiceTemplate};
use crate::error::ControllerError;
use crate::selector::LabelMatcher;
use clap::{Parser, ValueEnum};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use resource_client::RetryPolicy;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Port range the API server accepts for NodePort Services
const NODE_PORT_RANGE: RangeInclusive<i32> = 30000..=32767;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

/// Service Provisioner CLI
#[derive(Debug, Parser)]
#[command(name = "service-provisioner")]
#[command(about = "Provisions a Service for every labelled Deployment", long_about = None)]
#[command(version)]
pub struct Args {
    /// Load credentials from a kubeconfig file instead of the in-cluster service account
    #[arg(long, env = "OUTSIDE_CLUSTER")]
    pub outside_cluster: bool,

    /// Kubeconfig path used with --outside-cluster (default: $HOME/.kube/config)
    #[arg(long, env = "KUBECONFIG_PATH")]
    pub kubeconfig: Option<PathBuf>,

    /// Namespace to watch
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Label key a Deployment must carry
    #[arg(long, env = "SELECTOR_KEY", default_value = "ntcu-k8s")]
    pub selector_key: String,

    /// Required value of the selector label
    #[arg(long, env = "SELECTOR_VALUE", default_value = "hw3")]
    pub selector_value: String,

    /// Seconds between cache replays
    #[arg(long, env = "RESYNC_SECONDS", default_value_t = 5)]
    pub resync_seconds: u64,

    /// Appended to the Deployment name to name the Service
    #[arg(long, env = "SERVICE_NAME_SUFFIX", default_value = "-svc")]
    pub service_name_suffix: String,

    /// Service port
    #[arg(long, env = "SERVICE_PORT", default_value_t = 80)]
    pub service_port: i32,

    /// Container port traffic is forwarded to
    #[arg(long, env = "TARGET_PORT", default_value_t = 80)]
    pub target_port: i32,

    /// Node port of the Service; 0 creates a ClusterIP Service
    #[arg(long, env = "NODE_PORT", default_value_t = 30010)]
    pub node_port: i32,

    /// Also provision a ConfigMap per Deployment
    #[arg(long, env = "WITH_CONFIG_MAP")]
    pub with_config_map: bool,

    /// Appended to the Deployment name to name the ConfigMap
    #[arg(long, env = "CONFIG_MAP_NAME_SUFFIX", default_value = "-config")]
    pub config_map_name_suffix: String,

    /// ConfigMap entry as key=value (repeatable)
    #[arg(long, env = "CONFIG_MAP_DATA", value_delimiter = ',', default_value = "foo=bar")]
    pub config_map_data: Vec<String>,

    /// Retries for transient API failures
    #[arg(long, env = "MAX_RETRIES", default_value_t = 5)]
    pub max_retries: u32,

    /// First retry delay in milliseconds
    #[arg(long, env = "RETRY_BASE_MS", default_value_t = 200)]
    pub retry_base_ms: u64,

    /// Retry delay cap in milliseconds
    #[arg(long, env = "RETRY_MAX_MS", default_value_t = 5000)]
    pub retry_max_ms: u64,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Validated controller settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub namespace: String,
    pub matcher: LabelMatcher,
    pub resync_period: Duration,
    pub template: DerivedTemplate,
    pub retry: RetryPolicy,
}

/// Where cluster credentials come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Service account mounted into the pod
    InCluster,
    /// Kubeconfig file
    Kubeconfig(PathBuf),
}

impl Args {
    /// Credential source selected by the flags
    pub fn credentials(&self) -> Result<Credentials, ControllerError> {
        if !self.outside_cluster {
            return Ok(Credentials::InCluster);
        }
        match &self.kubeconfig {
            Some(path) => Ok(Credentials::Kubeconfig(path.clone())),
            None => default_kubeconfig_path().map(Credentials::Kubeconfig),
        }
    }

    /// Validate the arguments into a [`ControllerConfig`]
    pub fn into_config(self) -> Result<ControllerConfig, ControllerError> {
        require_non_empty("namespace", &self.namespace)?;
        require_non_empty("selector key", &self.selector_key)?;
        require_non_empty("Service name suffix", &self.service_name_suffix)?;

        if self.resync_seconds == 0 {
            return Err(ControllerError::InvalidConfig(
                "resync period must be at least one second".to_string(),
            ));
        }
        validate_port("Service port", self.service_port)?;
        validate_port("target port", self.target_port)?;

        let node_port = match self.node_port {
            0 => None,
            port if NODE_PORT_RANGE.contains(&port) => Some(port),
            port => {
                return Err(ControllerError::InvalidConfig(format!(
                    "node port {} outside {}-{}",
                    port,
                    NODE_PORT_RANGE.start(),
                    NODE_PORT_RANGE.end()
                )));
            }
        };

        let config_map = if self.with_config_map {
            require_non_empty("ConfigMap name suffix", &self.config_map_name_suffix)?;
            Some(ConfigMapTemplate {
                name_suffix: self.config_map_name_suffix,
                data: parse_data(&self.config_map_data)?,
            })
        } else {
            None
        };

        if self.retry_max_ms < self.retry_base_ms {
            return Err(ControllerError::InvalidConfig(format!(
                "retry cap {}ms is below the base delay {}ms",
                self.retry_max_ms, self.retry_base_ms
            )));
        }

        let template = DerivedTemplate {
            service: ServiceTemplate {
                name_suffix: self.service_name_suffix,
                port: self.service_port,
                target_port: self.target_port,
                node_port,
                ..Default::default()
            },
            config_map,
            labels: BTreeMap::from([(self.selector_key.clone(), self.selector_value.clone())]),
        };

        Ok(ControllerConfig {
            namespace: self.namespace,
            matcher: LabelMatcher::new(self.selector_key, self.selector_value),
            resync_period: Duration::from_secs(self.resync_seconds),
            template,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.retry_base_ms),
                max_delay: Duration::from_millis(self.retry_max_ms),
            },
        })
    }
}

impl Credentials {
    /// Build a Kubernetes client from these credentials
    pub async fn connect(&self) -> Result<Client, ControllerError> {
        let config = match self {
            Self::InCluster => {
                info!("Using in-cluster credentials");
                kube::Config::incluster()
                    .map_err(|e| ControllerError::Credentials(format!("in-cluster config: {}", e)))?
            }
            Self::Kubeconfig(path) => {
                info!("Using kubeconfig {}", path.display());
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    ControllerError::Credentials(format!("reading {}: {}", path.display(), e))
                })?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| ControllerError::Credentials(format!("loading {}: {}", path.display(), e)))?
            }
        };

        Ok(Client::try_from(config)?)
    }
}

fn default_kubeconfig_path() -> Result<PathBuf, ControllerError> {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".kube").join("config"))
        .ok_or_else(|| {
            ControllerError::Credentials("HOME is not set and no --kubeconfig was given".to_string())
        })
}

fn require_non_empty(what: &str, value: &str) -> Result<(), ControllerError> {
    if value.trim().is_empty() {
        return Err(ControllerError::InvalidConfig(format!("{} must not be empty", what)));
    }
    Ok(())
}

fn validate_port(what: &str, port: i32) -> Result<(), ControllerError> {
    if !(1..=65535).contains(&port) {
        return Err(ControllerError::InvalidConfig(format!("{} {} outside 1-65535", what, port)));
    }
    Ok(())
}

fn parse_data(entries: &[String]) -> Result<BTreeMap<String, String>, ControllerError> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(ControllerError::InvalidConfig(format!(
                "ConfigMap entry '{}' is not key=value",
                entry
            ))),
        })
        .collect()
}
