//! API error type

use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::api::response::IntoApiResponse;
use crate::disruptors::DisruptorError;
use crate::k8s::K8sError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Kubernetes(#[from] K8sError),

    #[error(transparent)]
    Disruptor(DisruptorError),
}

impl AppError {
    pub fn not_found(msg: &str) -> Self {
        AppError::NotFound(msg.to_string())
    }

    pub fn bad_request(msg: &str) -> Self {
        AppError::BadRequest(msg.to_string())
    }
}

impl From<DisruptorError> for AppError {
    fn from(err: DisruptorError) -> Self {
        match err {
            DisruptorError::InvalidFault(msg) => AppError::BadRequest(msg),
            DisruptorError::NoTargets { .. } => AppError::NotFound(err.to_string()),
            DisruptorError::Kubernetes(e) => AppError::Kubernetes(e),
            other => AppError::Disruptor(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        Err::<(), _>(self).into_api_response().into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disruptor_error_mapping() {
        let err: AppError = DisruptorError::invalid_fault("bad rate").into();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err: AppError = DisruptorError::NoTargets {
            namespace: "test-ns".to_string(),
            selector: "app=web".to_string(),
        }
        .into();
        assert!(matches!(err, AppError::NotFound(_)));

        let err: AppError = DisruptorError::Cancelled {
            pod: "pod1".to_string(),
        }
        .into();
        assert!(matches!(err, AppError::Disruptor(_)));
    }
}
