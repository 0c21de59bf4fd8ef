//! Pod disruptor
//!
//! Resolves the target pods of a selector, injects the agent in all of them
//! and injects faults through the agent controller.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::commands::{
    cleanup_command, grpc_command, http_command, network_command, FaultOptions, GrpcFault,
    HttpFault, NetworkFault,
};
use super::controller::{AgentController, InjectTimeout};
use super::error::{DisruptorError, DisruptorResult};
use super::visitor::VisitCommands;
use crate::k8s::{PodHelper, PodSelector, DEFAULT_AGENT_IMAGE};

/// Options for building a pod disruptor
#[derive(Debug, Clone)]
pub struct PodDisruptorOptions {
    pub inject_timeout: InjectTimeout,
    pub agent_image: String,
}

impl Default for PodDisruptorOptions {
    fn default() -> Self {
        Self {
            inject_timeout: InjectTimeout::default(),
            agent_image: DEFAULT_AGENT_IMAGE.to_string(),
        }
    }
}

/// Injects faults in the pods matched by a selector
pub struct PodDisruptor {
    controller: AgentController,
}

impl PodDisruptor {
    /// Resolve targets and inject the agent in each of them
    #[instrument(skip(cancel, helper, options), fields(namespace = %selector.namespace))]
    pub async fn new(
        cancel: CancellationToken,
        helper: Arc<dyn PodHelper>,
        selector: &PodSelector,
        options: PodDisruptorOptions,
    ) -> DisruptorResult<Self> {
        let targets = helper.list_pods(selector).await?;
        if targets.is_empty() {
            return Err(DisruptorError::NoTargets {
                namespace: selector.namespace.clone(),
                selector: selector.label_selector(),
            });
        }
        info!(targets = ?targets, "Resolved disruptor targets");

        Self::from_targets(cancel, helper, &selector.namespace, targets, options).await
    }

    /// Inject the agent in an already resolved list of targets
    pub async fn from_targets(
        cancel: CancellationToken,
        helper: Arc<dyn PodHelper>,
        namespace: &str,
        targets: Vec<String>,
        options: PodDisruptorOptions,
    ) -> DisruptorResult<Self> {
        let controller =
            AgentController::new(cancel, helper, namespace, targets, options.inject_timeout)
                .with_agent_image(&options.agent_image);

        controller.inject_disruptor_agent().await?;

        Ok(Self { controller })
    }

    pub fn targets(&self) -> DisruptorResult<Vec<String>> {
        self.controller.targets()
    }

    /// Inject HTTP faults in every target for the given duration
    pub async fn inject_http_faults(
        &self,
        fault: &HttpFault,
        duration: Duration,
        options: &FaultOptions,
    ) -> DisruptorResult<()> {
        let exec = http_command(fault, duration, options)?;
        self.run_with_cleanup(exec).await
    }

    /// Inject gRPC faults in every target for the given duration
    pub async fn inject_grpc_faults(
        &self,
        fault: &GrpcFault,
        duration: Duration,
        options: &FaultOptions,
    ) -> DisruptorResult<()> {
        let exec = grpc_command(fault, duration, options)?;
        self.run_with_cleanup(exec).await
    }

    /// Drop network traffic in every target for the given duration
    pub async fn inject_network_faults(
        &self,
        fault: &NetworkFault,
        duration: Duration,
    ) -> DisruptorResult<()> {
        let exec = network_command(fault, duration)?;
        self.run_with_cleanup(exec).await
    }

    async fn run_with_cleanup(&self, exec: Vec<String>) -> DisruptorResult<()> {
        let visitor = move |_: &str| -> DisruptorResult<VisitCommands> {
            Ok(VisitCommands::new(exec.clone(), cleanup_command()))
        };
        self.controller.visit(&visitor).await
    }
}
