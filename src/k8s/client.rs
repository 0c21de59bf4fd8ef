//! Kubernetes client wrapper and the kube backed pod helper

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{EphemeralContainer, Pod};
use kube::{
    api::{Api, AttachParams, ListParams, Patch, PatchParams},
    runtime::wait::await_condition,
    Client, Config,
};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, instrument};

use super::error::{K8sError, K8sResult};
use super::helper::{AttachOptions, ExecOutput, PodHelper, PodHelperFactory};
use super::selector::PodSelector;

/// Wrapper around kube::Client used to build namespaced pod helpers
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    /// Create a new K8sClient using the default kubeconfig or in-cluster config
    #[instrument(skip_all)]
    pub async fn new() -> K8sResult<Self> {
        let config = Config::infer().await.map_err(|e| K8sError::Api {
            message: e.to_string(),
        })?;
        let client = Client::try_from(config)?;

        info!("Connected to Kubernetes cluster");

        Ok(Self { client })
    }

    /// Get the inner kube Client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Check if cluster is reachable
    pub async fn health_check(&self) -> K8sResult<bool> {
        let version = self.client.apiserver_version().await?;
        info!(version = %version.git_version, "Kubernetes cluster is healthy");
        Ok(true)
    }
}

impl PodHelperFactory for K8sClient {
    fn pod_helper(&self, namespace: &str) -> Arc<dyn PodHelper> {
        Arc::new(KubePodHelper::new(self.client.clone(), namespace))
    }
}

/// Pod helper talking to a real cluster
#[derive(Clone)]
pub struct KubePodHelper {
    client: Client,
    namespace: String,
}

impl KubePodHelper {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    async fn get_pod(&self, name: &str) -> K8sResult<Pod> {
        match self.pods().get(name).await {
            Ok(pod) => Ok(pod),
            Err(kube::Error::Api(err)) if err.code == 404 => {
                Err(K8sError::PodNotFound { name: name.into() })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl PodHelper for KubePodHelper {
    #[instrument(skip(self, container), fields(namespace = %self.namespace, container = %container.name))]
    async fn attach_ephemeral_container(
        &self,
        pod: &str,
        container: EphemeralContainer,
        options: AttachOptions,
    ) -> K8sResult<()> {
        let current = self.get_pod(pod).await?;
        let name = container.name.clone();

        if has_ephemeral_container(&current, &name) {
            if !options.ignore_if_exists {
                return Err(K8sError::ContainerExists {
                    pod: pod.to_string(),
                    container: name,
                });
            }
            debug!("Ephemeral container already attached");
        } else {
            let patch = json!({
                "spec": {
                    "ephemeralContainers": [container]
                }
            });
            self.pods()
                .patch_subresource(
                    "ephemeralcontainers",
                    pod,
                    &PatchParams::default(),
                    &Patch::Strategic(patch),
                )
                .await?;
            info!("Attached ephemeral container");
        }

        if options.timeout.is_zero() {
            return Ok(());
        }

        let running = await_condition(self.pods(), pod, is_container_running(name.clone()));
        match tokio::time::timeout(options.timeout, running).await {
            Ok(Ok(_)) => {
                debug!("Ephemeral container is running");
                Ok(())
            }
            Ok(Err(e)) => Err(K8sError::Api {
                message: e.to_string(),
            }),
            Err(_) => Err(K8sError::Timeout {
                pod: pod.to_string(),
                container: name,
            }),
        }
    }

    #[instrument(skip(self, stdin), fields(namespace = %self.namespace))]
    async fn exec(
        &self,
        pod: &str,
        container: &str,
        command: Vec<String>,
        stdin: Vec<u8>,
    ) -> K8sResult<ExecOutput> {
        let params = AttachParams::default()
            .container(container)
            .stdin(!stdin.is_empty())
            .stdout(true)
            .stderr(true);

        let mut attached = self
            .pods()
            .exec(pod, command, &params)
            .await
            .map_err(|e| match e {
                kube::Error::Api(ref err) if err.code == 404 => {
                    K8sError::PodNotFound { name: pod.into() }
                }
                _ => K8sError::Exec {
                    message: e.to_string(),
                    stderr: Vec::new(),
                },
            })?;

        if let Some(mut writer) = attached.stdin() {
            writer.write_all(&stdin).await?;
            writer.shutdown().await?;
        }

        let status = attached.take_status();
        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let (stdout, stderr) = tokio::try_join!(read_stream(stdout), read_stream(stderr))?;

        let status = match status {
            Some(pending) => pending.await,
            None => None,
        };

        match status {
            Some(s) if s.status.as_deref() != Some("Success") => Err(K8sError::Exec {
                message: s
                    .message
                    .unwrap_or_else(|| "command terminated with an error".to_string()),
                stderr,
            }),
            _ => Ok(ExecOutput { stdout, stderr }),
        }
    }

    #[instrument(skip(self), fields(selector = %selector.label_selector()))]
    async fn list_pods(&self, selector: &PodSelector) -> K8sResult<Vec<String>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &selector.namespace);
        let lp = ListParams::default().labels(&selector.label_selector());
        let list = pods.list(&lp).await?;

        let names: Vec<String> = list
            .items
            .into_iter()
            .filter(is_pod_running)
            .filter_map(|pod| pod.metadata.name)
            .collect();

        debug!(count = names.len(), "Listed running pods");
        Ok(names)
    }
}

fn has_ephemeral_container(pod: &Pod, name: &str) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.ephemeral_containers.as_ref())
        .map(|containers| containers.iter().any(|c| c.name == name))
        .unwrap_or(false)
}

fn is_pod_running(pod: &Pod) -> bool {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
}

fn is_container_running(container: String) -> impl Fn(Option<&Pod>) -> bool {
    move |pod: Option<&Pod>| {
        pod.and_then(|p| p.status.as_ref())
            .and_then(|s| s.ephemeral_container_statuses.as_ref())
            .map(|statuses| {
                statuses.iter().any(|cs| {
                    cs.name == container
                        && cs.state.as_ref().and_then(|s| s.running.as_ref()).is_some()
                })
            })
            .unwrap_or(false)
    }
}

async fn read_stream<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}
