//! Disruptions API
//!
//! Starts fault injections in the background, tracks them in memory and lets
//! clients cancel running ones.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::targets::with_default_namespace;
use crate::api::AppState;
use crate::disruptors::{
    grpc_command, http_command, network_command, DisruptorError, DisruptorResult, FaultOptions,
    GrpcFault, HttpFault, InjectTimeout, NetworkFault, PodDisruptor, PodDisruptorOptions,
    DEFAULT_PROXY_PORT,
};
use crate::error::{AppError, AppResult};
use crate::k8s::{PodHelper, PodSelector};

/// Kind of fault injected by a disruption
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FaultKind {
    Http,
    Grpc,
    Network,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultKind::Http => write!(f, "http"),
            FaultKind::Grpc => write!(f, "grpc"),
            FaultKind::Network => write!(f, "network"),
        }
    }
}

/// Disruption status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DisruptionStatus {
    Injecting,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl DisruptionStatus {
    pub fn is_active(self) -> bool {
        matches!(self, DisruptionStatus::Injecting | DisruptionStatus::Running)
    }
}

impl std::fmt::Display for DisruptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisruptionStatus::Injecting => write!(f, "injecting"),
            DisruptionStatus::Running => write!(f, "running"),
            DisruptionStatus::Completed => write!(f, "completed"),
            DisruptionStatus::Failed => write!(f, "failed"),
            DisruptionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Disruption record
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Disruption {
    pub id: String,
    pub namespace: String,
    pub fault: FaultKind,
    pub targets: Vec<String>,
    pub duration_secs: u64,
    pub status: DisruptionStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Start disruption request
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDisruptionRequest {
    pub selector: PodSelector,
    pub fault: FaultKind,
    /// Fault parameters, shaped after HttpFault, GrpcFault or NetworkFault
    #[serde(default)]
    #[schema(value_type = Object)]
    pub params: serde_json::Value,
    pub duration_secs: u64,
    /// Seconds to wait for the agent. Zero uses the default, negative does not wait.
    #[serde(default)]
    pub inject_timeout_secs: Option<i64>,
    #[serde(default)]
    pub proxy_port: Option<u16>,
}

/// Query parameters for listing disruptions
#[derive(Debug, Deserialize)]
pub struct ListDisruptionsQuery {
    pub status: Option<DisruptionStatus>,
}

#[derive(Debug, Clone)]
enum Fault {
    Http(HttpFault),
    Grpc(GrpcFault),
    Network(NetworkFault),
}

impl Fault {
    fn parse(kind: FaultKind, params: &serde_json::Value) -> AppResult<Self> {
        let params = if params.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            params.clone()
        };
        let invalid = |e: serde_json::Error| {
            AppError::bad_request(&format!("Invalid {} fault parameters: {}", kind, e))
        };

        let fault = match kind {
            FaultKind::Http => Fault::Http(serde_json::from_value(params).map_err(invalid)?),
            FaultKind::Grpc => Fault::Grpc(serde_json::from_value(params).map_err(invalid)?),
            FaultKind::Network => Fault::Network(serde_json::from_value(params).map_err(invalid)?),
        };
        Ok(fault)
    }

    /// Build the agent command, which validates the fault
    fn command(&self, duration: Duration, options: &FaultOptions) -> DisruptorResult<Vec<String>> {
        match self {
            Fault::Http(fault) => http_command(fault, duration, options),
            Fault::Grpc(fault) => grpc_command(fault, duration, options),
            Fault::Network(fault) => network_command(fault, duration),
        }
    }

    async fn inject(
        &self,
        disruptor: &PodDisruptor,
        duration: Duration,
        options: &FaultOptions,
    ) -> DisruptorResult<()> {
        match self {
            Fault::Http(fault) => disruptor.inject_http_faults(fault, duration, options).await,
            Fault::Grpc(fault) => disruptor.inject_grpc_faults(fault, duration, options).await,
            Fault::Network(fault) => disruptor.inject_network_faults(fault, duration).await,
        }
    }
}

struct Entry {
    disruption: Disruption,
    cancel: CancellationToken,
}

/// Finished disruptions kept for inspection
pub const DEFAULT_RETENTION: usize = 100;

/// In-memory registry of disruptions
#[derive(Clone)]
pub struct DisruptionRegistry {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
    retention: usize,
}

impl Default for DisruptionRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl DisruptionRegistry {
    /// Registry keeping at most `retention` finished disruptions
    pub fn with_retention(retention: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            retention,
        }
    }

    /// Register a disruption unless an active one already targets one of its pods.
    ///
    /// Returns the id of the conflicting disruption otherwise.
    async fn try_insert(
        &self,
        disruption: Disruption,
        cancel: CancellationToken,
    ) -> Result<(), String> {
        let mut guard = self.inner.write().await;
        let conflict = guard.values().find(|entry| {
            let active = &entry.disruption;
            active.status.is_active()
                && active.namespace == disruption.namespace
                && active.targets.iter().any(|t| disruption.targets.contains(t))
        });
        if let Some(entry) = conflict {
            return Err(entry.disruption.id.clone());
        }

        guard.insert(disruption.id.clone(), Entry { disruption, cancel });
        prune_finished(&mut guard, self.retention);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Disruption> {
        self.inner.read().await.get(id).map(|e| e.disruption.clone())
    }

    /// All disruptions, most recent first
    pub async fn list(&self) -> Vec<Disruption> {
        let mut all: Vec<Disruption> = self
            .inner
            .read()
            .await
            .values()
            .map(|e| e.disruption.clone())
            .collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all
    }

    async fn update(&self, id: &str, f: impl FnOnce(&mut Disruption)) {
        if let Some(entry) = self.inner.write().await.get_mut(id) {
            f(&mut entry.disruption);
        }
    }

    /// Request cancellation of an active disruption
    async fn cancel(&self, id: &str) -> AppResult<Disruption> {
        let guard = self.inner.read().await;
        let entry = guard
            .get(id)
            .ok_or_else(|| AppError::not_found(&format!("Disruption {} not found", id)))?;

        if !entry.disruption.status.is_active() {
            return Err(AppError::Conflict(format!(
                "Disruption {} is already {}",
                id, entry.disruption.status
            )));
        }

        entry.cancel.cancel();
        Ok(entry.disruption.clone())
    }
}

/// Drop the oldest finished disruptions beyond `retention`. Active ones are kept.
fn prune_finished(entries: &mut HashMap<String, Entry>, retention: usize) {
    let mut finished: Vec<(DateTime<Utc>, String)> = entries
        .values()
        .map(|e| &e.disruption)
        .filter(|d| !d.status.is_active())
        .map(|d| (d.completed_at.unwrap_or(d.started_at), d.id.clone()))
        .collect();
    if finished.len() <= retention {
        return;
    }

    finished.sort();
    let excess = finished.len() - retention;
    for (_, id) in finished.into_iter().take(excess) {
        entries.remove(&id);
    }
}

/// List disruptions
#[utoipa::path(
    get,
    path = "/api/v1/disruptions",
    tag = "disruptions",
    params(
        ("status" = Option<String>, Query, description = "Only disruptions in this status"),
    ),
    responses(
        (status = 200, description = "Disruptions, most recent first", body = Vec<Disruption>),
    )
)]
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListDisruptionsQuery>,
) -> Json<Vec<Disruption>> {
    let mut all = state.disruptions.list().await;
    if let Some(status) = query.status {
        all.retain(|d| d.status == status);
    }
    Json(all)
}

/// Get a disruption
#[utoipa::path(
    get,
    path = "/api/v1/disruptions/{id}",
    tag = "disruptions",
    params(("id" = String, Path, description = "Disruption ID")),
    responses(
        (status = 200, description = "Disruption", body = Disruption),
        (status = 404, description = "Disruption not found"),
    )
)]
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Disruption>> {
    state
        .disruptions
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::not_found(&format!("Disruption {} not found", id)))
}

/// Start a disruption
///
/// Targets are resolved before returning. Agent injection and the fault
/// itself run in the background.
#[utoipa::path(
    post,
    path = "/api/v1/disruptions",
    tag = "disruptions",
    request_body = CreateDisruptionRequest,
    responses(
        (status = 200, description = "Disruption started", body = Disruption),
        (status = 400, description = "Invalid fault"),
        (status = 404, description = "No pod matches the selector"),
        (status = 409, description = "Targets already disrupted"),
    )
)]
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateDisruptionRequest>,
) -> AppResult<Json<Disruption>> {
    let fault = Fault::parse(req.fault, &req.params)?;
    let duration = Duration::from_secs(req.duration_secs);
    let fault_options = FaultOptions {
        proxy_port: req.proxy_port.unwrap_or(DEFAULT_PROXY_PORT),
    };
    fault.command(duration, &fault_options)?;

    let selector = with_default_namespace(req.selector, &state.config.namespace);
    let helper = state.pod_helper(&selector.namespace).await?;
    let targets = helper.list_pods(&selector).await?;
    if targets.is_empty() {
        return Err(DisruptorError::NoTargets {
            namespace: selector.namespace.clone(),
            selector: selector.label_selector(),
        }
        .into());
    }

    let inject_timeout = match req.inject_timeout_secs {
        Some(secs) => InjectTimeout::from_secs(secs),
        None => state.config.inject_timeout(),
    };
    let options = PodDisruptorOptions {
        inject_timeout,
        agent_image: state.config.agent_image.clone(),
    };

    let disruption = Disruption {
        id: Uuid::new_v4().to_string(),
        namespace: selector.namespace.clone(),
        fault: req.fault,
        targets: targets.clone(),
        duration_secs: req.duration_secs,
        status: DisruptionStatus::Injecting,
        error: None,
        started_at: Utc::now(),
        completed_at: None,
    };

    let cancel = CancellationToken::new();
    state
        .disruptions
        .try_insert(disruption.clone(), cancel.clone())
        .await
        .map_err(|other| {
            AppError::Conflict(format!(
                "Targets are already disrupted by disruption {}",
                other
            ))
        })?;

    info!(
        disruption_id = %disruption.id,
        namespace = %disruption.namespace,
        fault = %disruption.fault,
        targets = ?disruption.targets,
        "Starting disruption"
    );

    let run = Run {
        registry: state.disruptions.clone(),
        id: disruption.id.clone(),
        helper,
        namespace: selector.namespace,
        targets,
        fault,
        duration,
        fault_options,
        options,
        cancel,
    };
    tokio::spawn(run.execute());

    Ok(Json(disruption))
}

/// Cancel a running disruption
#[utoipa::path(
    delete,
    path = "/api/v1/disruptions/{id}",
    tag = "disruptions",
    params(("id" = String, Path, description = "Disruption ID")),
    responses(
        (status = 200, description = "Cancellation requested", body = Disruption),
        (status = 404, description = "Disruption not found"),
        (status = 409, description = "Disruption already finished"),
    )
)]
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Disruption>> {
    let disruption = state.disruptions.cancel(&id).await?;
    info!(disruption_id = %id, "Cancelling disruption");
    Ok(Json(disruption))
}

/// A disruption executed in the background
struct Run {
    registry: DisruptionRegistry,
    id: String,
    helper: Arc<dyn PodHelper>,
    namespace: String,
    targets: Vec<String>,
    fault: Fault,
    duration: Duration,
    fault_options: FaultOptions,
    options: PodDisruptorOptions,
    cancel: CancellationToken,
}

impl Run {
    async fn execute(self) {
        let result = self.inject().await;

        let status = match &result {
            Ok(()) => DisruptionStatus::Completed,
            Err(DisruptorError::Cancelled { .. }) => DisruptionStatus::Cancelled,
            Err(_) if self.cancel.is_cancelled() => DisruptionStatus::Cancelled,
            Err(_) => DisruptionStatus::Failed,
        };
        let error = result.err().map(|e| e.to_string());

        match &error {
            Some(e) => warn!(disruption_id = %self.id, status = %status, error = %e, "Disruption ended"),
            None => info!(disruption_id = %self.id, "Disruption completed"),
        }
        metrics::counter!("disruptor_disruptions_total", 1, "status" => status.to_string());

        self.registry
            .update(&self.id, |d| {
                d.status = status;
                d.error = error;
                d.completed_at = Some(Utc::now());
            })
            .await;
    }

    async fn inject(&self) -> DisruptorResult<()> {
        let disruptor = PodDisruptor::from_targets(
            self.cancel.clone(),
            Arc::clone(&self.helper),
            &self.namespace,
            self.targets.clone(),
            self.options.clone(),
        )
        .await?;

        self.registry
            .update(&self.id, |d| d.status = DisruptionStatus::Running)
            .await;

        self.fault
            .inject(&disruptor, self.duration, &self.fault_options)
            .await
    }
}
