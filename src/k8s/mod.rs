//! Kubernetes integration module
//!
//! This module handles all interactions with the cluster:
//! - Attaching the agent as an ephemeral container to target pods
//! - Executing agent commands inside those containers
//! - Resolving target pods from label selectors

mod client;
mod error;
pub mod fake;
mod helper;
mod resources;
mod selector;

pub use client::{K8sClient, KubePodHelper};
pub use error::{K8sError, K8sResult};
pub use helper::{AttachOptions, ExecOutput, PodHelper, PodHelperFactory};
pub use resources::{agent_container, AGENT_CONTAINER_NAME, DEFAULT_AGENT_IMAGE};
pub use selector::PodSelector;

#[cfg(test)]
pub use helper::MockPodHelper;
