//! Kubernetes resource builders for the disruptor agent

use k8s_openapi::api::core::v1::{Capabilities, EphemeralContainer, SecurityContext};

/// Name of the ephemeral container running the agent
pub const AGENT_CONTAINER_NAME: &str = "disruptor-agent";

/// Default image for the agent container
pub const DEFAULT_AGENT_IMAGE: &str = "ghcr.io/pod-disruptor/disruptor-agent:latest";

/// Build the ephemeral container spec attached to every target pod
///
/// The agent manipulates the pod's network stack, so it needs `NET_ADMIN`
/// and runs as root regardless of the pod's own security policy. It is
/// driven as an interactive process, hence TTY and stdin.
pub fn agent_container(image: &str) -> EphemeralContainer {
    EphemeralContainer {
        name: AGENT_CONTAINER_NAME.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        security_context: Some(SecurityContext {
            capabilities: Some(Capabilities {
                add: Some(vec!["NET_ADMIN".to_string()]),
                ..Default::default()
            }),
            run_as_user: Some(0),
            run_as_group: Some(0),
            run_as_non_root: Some(false),
            ..Default::default()
        }),
        tty: Some(true),
        stdin: Some(true),
        ..Default::default()
    }
}
