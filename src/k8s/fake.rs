//! In-memory pod helper
//!
//! Keeps pods, attached ephemeral containers and a history of executed
//! commands in memory. Ephemeral containers never report ready unless
//! configured otherwise, the same way a fake API server never updates pod
//! status.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::EphemeralContainer;

use super::error::{K8sError, K8sResult};
use super::helper::{AttachOptions, ExecOutput, PodHelper, PodHelperFactory};
use super::selector::PodSelector;

/// A command executed through the fake helper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub pod: String,
    pub container: String,
    pub namespace: String,
    pub command: Vec<String>,
    pub stdin: Vec<u8>,
}

#[derive(Debug, Clone)]
struct FakePod {
    labels: BTreeMap<String, String>,
    running: bool,
    ephemeral_containers: Vec<String>,
}

#[derive(Debug, Default)]
struct FakeState {
    pods: BTreeMap<String, FakePod>,
    history: Vec<Command>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    error: Option<String>,
    ready: bool,
}

/// Pod helper backed by in-memory state
#[derive(Debug, Clone)]
pub struct FakePodHelper {
    namespace: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakePodHelper {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            state: Arc::new(Mutex::new(FakeState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        // a panicking test thread must not hide the state from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a running pod
    pub fn with_pod(self, name: &str, labels: &[(&str, &str)]) -> Self {
        self.add_pod(name, labels, true);
        self
    }

    /// Add a pod, optionally not yet running
    pub fn add_pod(&self, name: &str, labels: &[(&str, &str)], running: bool) {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.state().pods.insert(
            name.to_string(),
            FakePod {
                labels,
                running,
                ephemeral_containers: Vec::new(),
            },
        );
    }

    /// Make attached ephemeral containers report ready immediately
    pub fn set_ready(&self, ready: bool) {
        self.state().ready = ready;
    }

    /// Set the result returned by every subsequent exec
    pub fn set_result(&self, stdout: &[u8], stderr: &[u8], error: Option<&str>) {
        let mut state = self.state();
        state.stdout = stdout.to_vec();
        state.stderr = stderr.to_vec();
        state.error = error.map(str::to_string);
    }

    /// Commands executed so far, in execution order
    pub fn history(&self) -> Vec<Command> {
        self.state().history.clone()
    }

    /// Names of the ephemeral containers attached to a pod
    pub fn ephemeral_containers(&self, pod: &str) -> Vec<String> {
        self.state()
            .pods
            .get(pod)
            .map(|p| p.ephemeral_containers.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PodHelper for FakePodHelper {
    async fn attach_ephemeral_container(
        &self,
        pod: &str,
        container: EphemeralContainer,
        options: AttachOptions,
    ) -> K8sResult<()> {
        let ready = {
            let mut state = self.state();
            let ready = state.ready;
            let target = state
                .pods
                .get_mut(pod)
                .ok_or_else(|| K8sError::PodNotFound { name: pod.into() })?;

            if target.ephemeral_containers.contains(&container.name) {
                if !options.ignore_if_exists {
                    return Err(K8sError::ContainerExists {
                        pod: pod.to_string(),
                        container: container.name,
                    });
                }
            } else {
                target.ephemeral_containers.push(container.name.clone());
            }
            ready
        };

        if options.timeout.is_zero() || ready {
            return Ok(());
        }

        tokio::time::sleep(options.timeout).await;
        Err(K8sError::Timeout {
            pod: pod.to_string(),
            container: container.name,
        })
    }

    async fn exec(
        &self,
        pod: &str,
        container: &str,
        command: Vec<String>,
        stdin: Vec<u8>,
    ) -> K8sResult<ExecOutput> {
        let mut state = self.state();
        state.history.push(Command {
            pod: pod.to_string(),
            container: container.to_string(),
            namespace: self.namespace.clone(),
            command,
            stdin,
        });

        match &state.error {
            Some(message) => Err(K8sError::Exec {
                message: message.clone(),
                stderr: state.stderr.clone(),
            }),
            None => Ok(ExecOutput {
                stdout: state.stdout.clone(),
                stderr: state.stderr.clone(),
            }),
        }
    }

    async fn list_pods(&self, selector: &PodSelector) -> K8sResult<Vec<String>> {
        if selector.namespace != self.namespace {
            return Ok(Vec::new());
        }

        Ok(self
            .state()
            .pods
            .iter()
            .filter(|(_, pod)| pod.running && selector.matches(&pod.labels))
            .map(|(name, _)| name.clone())
            .collect())
    }
}

impl PodHelperFactory for FakePodHelper {
    fn pod_helper(&self, _namespace: &str) -> Arc<dyn PodHelper> {
        Arc::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn agent() -> EphemeralContainer {
        EphemeralContainer {
            name: "disruptor-agent".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_attach_unknown_pod() {
        let helper = FakePodHelper::new("test-ns");
        let err = helper
            .attach_ephemeral_container("missing", agent(), AttachOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, K8sError::PodNotFound { .. }));
    }

    #[tokio::test]
    async fn test_attach_existing_container() {
        let helper = FakePodHelper::new("test-ns").with_pod("pod1", &[]);
        let options = AttachOptions::default();

        helper
            .attach_ephemeral_container("pod1", agent(), options)
            .await
            .unwrap();
        let err = helper
            .attach_ephemeral_container("pod1", agent(), options)
            .await
            .unwrap_err();
        assert!(matches!(err, K8sError::ContainerExists { .. }));

        let options = AttachOptions {
            ignore_if_exists: true,
            ..options
        };
        helper
            .attach_ephemeral_container("pod1", agent(), options)
            .await
            .unwrap();
        assert_eq!(helper.ephemeral_containers("pod1"), vec!["disruptor-agent"]);
    }

    #[tokio::test]
    async fn test_attach_waits_for_readiness() {
        let helper = FakePodHelper::new("test-ns").with_pod("pod1", &[]);
        let options = AttachOptions {
            timeout: Duration::from_millis(10),
            ignore_if_exists: true,
        };

        let err = helper
            .attach_ephemeral_container("pod1", agent(), options)
            .await
            .unwrap_err();
        assert!(matches!(err, K8sError::Timeout { .. }));

        helper.set_ready(true);
        helper
            .attach_ephemeral_container("pod1", agent(), options)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_exec_records_history() {
        let helper = FakePodHelper::new("test-ns").with_pod("pod1", &[]);
        helper.set_result(b"out", b"", None);

        let output = helper
            .exec("pod1", "agent", vec!["ls".to_string()], Vec::new())
            .await
            .unwrap();
        assert_eq!(output.stdout, b"out");

        helper.set_result(b"", b"error output", Some("fake error"));
        let err = helper
            .exec("pod1", "agent", vec!["ls".to_string()], Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.stderr(), b"error output");

        let history = helper.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].namespace, "test-ns");
        assert_eq!(history[0].command, vec!["ls"]);
    }

    #[tokio::test]
    async fn test_list_pods() {
        let helper = FakePodHelper::new("test-ns")
            .with_pod("web-1", &[("app", "web")])
            .with_pod("web-2", &[("app", "web"), ("canary", "true")])
            .with_pod("db-1", &[("app", "db")]);
        helper.add_pod("web-3", &[("app", "web")], false);

        let selector = PodSelector::new("test-ns")
            .with_label("app", "web")
            .without_label("canary", "true");
        assert_eq!(helper.list_pods(&selector).await.unwrap(), vec!["web-1"]);

        let other = PodSelector::new("other-ns").with_label("app", "web");
        assert!(helper.list_pods(&other).await.unwrap().is_empty());
    }
}
