//! Errors reported by disruptors and the agent controller

use thiserror::Error;

use crate::k8s::K8sError;

/// Result type alias for disruptor operations.
pub type DisruptorResult<T> = Result<T, DisruptorError>;

#[derive(Error, Debug)]
pub enum DisruptorError {
    #[error("failed to inject agent in pod {pod}: {source}")]
    Injection {
        pod: String,
        #[source]
        source: K8sError,
    },

    #[error("failed to build agent command for pod {pod}: {message}")]
    Visitor { pod: String, message: String },

    #[error("error invoking agent in pod {pod}: {source} \n{stderr}")]
    AgentInvocation {
        pod: String,
        #[source]
        source: K8sError,
        stderr: String,
    },

    #[error("operation on pod {pod} was cancelled")]
    Cancelled { pod: String },

    #[error("agent task failed: {0}")]
    TaskFailed(String),

    #[error("invalid fault: {0}")]
    InvalidFault(String),

    #[error("no pods match selector {selector:?} in namespace {namespace}")]
    NoTargets { namespace: String, selector: String },

    #[error(transparent)]
    Kubernetes(#[from] K8sError),
}

impl DisruptorError {
    pub fn visitor(pod: &str, message: impl Into<String>) -> Self {
        DisruptorError::Visitor {
            pod: pod.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_fault(message: impl Into<String>) -> Self {
        DisruptorError::InvalidFault(message.into())
    }

    /// The pod a per-target failure belongs to
    pub fn pod(&self) -> Option<&str> {
        match self {
            DisruptorError::Injection { pod, .. }
            | DisruptorError::Visitor { pod, .. }
            | DisruptorError::AgentInvocation { pod, .. }
            | DisruptorError::Cancelled { pod } => Some(pod),
            _ => None,
        }
    }
}
