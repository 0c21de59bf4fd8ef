//! Errors raised by cluster operations

use thiserror::Error;

/// Result type alias for cluster operations.
pub type K8sResult<T> = Result<T, K8sError>;

/// Errors that can occur while talking to the Kubernetes API.
#[derive(Error, Debug)]
pub enum K8sError {
    #[error("K8s API error: {message}")]
    Api { message: String },

    #[error("Pod not found: {name}")]
    PodNotFound { name: String },

    #[error("Container {container} already exists in pod {pod}")]
    ContainerExists { pod: String, container: String },

    #[error("Timed out waiting for container {container} in pod {pod} to be ready")]
    Timeout { pod: String, container: String },

    #[error("Command failed: {message}")]
    Exec { message: String, stderr: Vec<u8> },

    #[error("Stream error: {0}")]
    Io(#[from] std::io::Error),
}

impl K8sError {
    /// Captured stderr of a failed command, empty for any other error
    pub fn stderr(&self) -> &[u8] {
        match self {
            K8sError::Exec { stderr, .. } => stderr,
            _ => &[],
        }
    }
}

impl From<kube::Error> for K8sError {
    fn from(err: kube::Error) -> Self {
        K8sError::Api {
            message: err.to_string(),
        }
    }
}
