//! OpenAPI documentation for the Pod Disruptor API

use utoipa::OpenApi;

/// API Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Pod Disruptor API",
        version = "1.0.0",
        description = "Fault injection for Kubernetes pods.\n\n## Features\n- Resolve target pods from label selectors\n- Inject a disruptor agent as an ephemeral container\n- Inject HTTP and gRPC errors and delays\n- Drop network traffic\n- Cancel running disruptions",
        license(name = "MIT"),
        contact(name = "Pod Disruptor Team")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server")
    ),
    tags(
        (name = "disruptions", description = "Start, inspect and cancel fault injections"),
        (name = "targets", description = "Target pod discovery"),
        (name = "metrics", description = "Prometheus metrics"),
        (name = "cluster", description = "Kubernetes cluster status")
    ),
    paths(
        // Disruptions
        crate::api::disruptions::list,
        crate::api::disruptions::create,
        crate::api::disruptions::get,
        crate::api::disruptions::cancel,
        // Targets
        crate::api::targets::list,
        // Cluster
        crate::api::health::cluster_status,
        crate::api::health::health_check,
        // Metrics
        crate::api::metrics::metrics_handler,
    ),
    components(
        schemas(
            crate::api::disruptions::Disruption,
            crate::api::disruptions::DisruptionStatus,
            crate::api::disruptions::FaultKind,
            crate::api::disruptions::CreateDisruptionRequest,
            crate::api::targets::TargetsRequest,
            crate::api::targets::TargetsResponse,
            crate::api::health::HealthResponse,
            crate::api::health::ClusterStatusResponse,
            crate::k8s::PodSelector,
            crate::disruptors::HttpFault,
            crate::disruptors::GrpcFault,
            crate::disruptors::NetworkFault,
            crate::disruptors::FaultOptions,
            ErrorResponse,
        )
    )
)]
pub struct ApiDoc;

/// Error response
#[derive(utoipa::ToSchema)]
#[allow(dead_code)]
pub struct ErrorResponse {
    /// Error code, e.g. NOT_FOUND or KUBERNETES_ERROR
    pub code: String,
    /// Error message
    pub message: String,
}
