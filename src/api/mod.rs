pub mod disruptions;
pub mod health;
pub mod metrics;
pub mod openapi;
pub mod response;
pub mod targets;

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::k8s::{K8sError, PodHelper, PodHelperFactory};
use disruptions::DisruptionRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub cluster: Arc<RwLock<Option<Arc<dyn PodHelperFactory>>>>,
    pub disruptions: DisruptionRegistry,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cluster: Arc::new(RwLock::new(None)),
            disruptions: DisruptionRegistry::default(),
            metrics: None,
        }
    }

    pub async fn set_cluster(&self, cluster: Arc<dyn PodHelperFactory>) {
        let mut guard = self.cluster.write().await;
        *guard = Some(cluster);
    }

    pub async fn clear_cluster(&self) {
        let mut guard = self.cluster.write().await;
        *guard = None;
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Pod helper for a namespace, if the cluster is connected
    pub async fn pod_helper(&self, namespace: &str) -> AppResult<Arc<dyn PodHelper>> {
        let guard = self.cluster.read().await;
        let cluster = guard.as_ref().ok_or_else(|| {
            AppError::Kubernetes(K8sError::Api {
                message: "Kubernetes cluster not available".to_string(),
            })
        })?;
        Ok(cluster.pod_helper(namespace))
    }
}
