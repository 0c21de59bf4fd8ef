//! Target discovery endpoint

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::AppState;
use crate::error::AppResult;
use crate::k8s::PodSelector;

#[derive(Debug, Deserialize, ToSchema)]
pub struct TargetsRequest {
    pub selector: PodSelector,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TargetsResponse {
    pub namespace: String,
    pub targets: Vec<String>,
}

/// List the running pods matched by a selector
#[utoipa::path(
    post,
    path = "/api/v1/targets",
    tag = "targets",
    request_body = TargetsRequest,
    responses(
        (status = 200, description = "Matching pods", body = TargetsResponse),
        (status = 500, description = "Cluster not available"),
    )
)]
pub async fn list(
    State(state): State<AppState>,
    Json(req): Json<TargetsRequest>,
) -> AppResult<Json<TargetsResponse>> {
    let selector = with_default_namespace(req.selector, &state.config.namespace);
    info!(namespace = %selector.namespace, selector = %selector.label_selector(), "Listing targets");

    let helper = state.pod_helper(&selector.namespace).await?;
    let targets = helper.list_pods(&selector).await?;

    Ok(Json(TargetsResponse {
        namespace: selector.namespace,
        targets,
    }))
}

/// Fill in the configured namespace when a selector leaves it empty
pub(crate) fn with_default_namespace(mut selector: PodSelector, namespace: &str) -> PodSelector {
    if selector.namespace.is_empty() {
        selector.namespace = namespace.to_string();
    }
    selector
}
