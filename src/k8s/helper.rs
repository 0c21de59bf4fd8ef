//! Pod level cluster operations used by the agent controller

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::EphemeralContainer;

#[cfg(test)]
use mockall::automock;

use super::error::K8sResult;
use super::selector::PodSelector;

/// Options for attaching an ephemeral container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttachOptions {
    /// How long to wait for the container to be running. Zero returns as
    /// soon as the attach request is accepted.
    pub timeout: Duration,
    /// Treat an already attached container with the same name as success
    pub ignore_if_exists: bool,
}

/// Output captured from a command executed in a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Operations on the pods of a single namespace.
///
/// The agent controller never talks to the Kubernetes API directly; every
/// interaction goes through this trait so it can be faked in tests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodHelper: Send + Sync {
    /// Attach an ephemeral container to a running pod
    async fn attach_ephemeral_container(
        &self,
        pod: &str,
        container: EphemeralContainer,
        options: AttachOptions,
    ) -> K8sResult<()>;

    /// Execute a command in a container of a pod and capture its output.
    ///
    /// A failed command is reported as `K8sError::Exec` carrying the
    /// captured stderr.
    async fn exec(
        &self,
        pod: &str,
        container: &str,
        command: Vec<String>,
        stdin: Vec<u8>,
    ) -> K8sResult<ExecOutput>;

    /// Names of the running pods matching a selector
    async fn list_pods(&self, selector: &PodSelector) -> K8sResult<Vec<String>>;
}

/// Builds pod helpers bound to a namespace
pub trait PodHelperFactory: Send + Sync {
    fn pod_helper(&self, namespace: &str) -> Arc<dyn PodHelper>;
}
