//! Agent controller
//!
//! Injects the disruptor agent into a fixed set of target pods and drives it
//! by executing commands in every target concurrently. Each target is handled
//! by its own task; every task runs to completion and the first failure seen
//! is reported for the whole operation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::error::{DisruptorError, DisruptorResult};
use super::visitor::{CommandVisitor, VisitCommands, Visitor};
use crate::k8s::{agent_container, AttachOptions, PodHelper, AGENT_CONTAINER_NAME, DEFAULT_AGENT_IMAGE};

/// Readiness wait used when the caller expresses no preference
pub const DEFAULT_INJECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for the agent container to be running after attaching it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InjectTimeout {
    /// Wait up to [`DEFAULT_INJECT_TIMEOUT`]
    #[default]
    UseDefault,
    /// Return as soon as the attach request is accepted
    NoWait,
    /// Wait up to the given duration
    WaitUpTo(Duration),
}

impl InjectTimeout {
    /// Map a signed number of seconds: zero selects the default, a negative
    /// value disables waiting.
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            0 => InjectTimeout::UseDefault,
            s if s < 0 => InjectTimeout::NoWait,
            s => InjectTimeout::WaitUpTo(Duration::from_secs(s.unsigned_abs())),
        }
    }

    /// The wait passed to each attach call. Zero means no wait.
    pub fn resolve(self) -> Duration {
        match self {
            InjectTimeout::UseDefault => DEFAULT_INJECT_TIMEOUT,
            InjectTimeout::NoWait => Duration::ZERO,
            InjectTimeout::WaitUpTo(timeout) => timeout,
        }
    }
}

/// Controls the agents of a set of target pods
#[derive(Clone)]
pub struct AgentController {
    cancel: CancellationToken,
    helper: Arc<dyn PodHelper>,
    namespace: String,
    targets: Vec<String>,
    timeout: Duration,
    agent_image: String,
}

impl AgentController {
    pub fn new(
        cancel: CancellationToken,
        helper: Arc<dyn PodHelper>,
        namespace: &str,
        targets: Vec<String>,
        timeout: InjectTimeout,
    ) -> Self {
        Self {
            cancel,
            helper,
            namespace: namespace.to_string(),
            targets,
            timeout: timeout.resolve(),
            agent_image: DEFAULT_AGENT_IMAGE.to_string(),
        }
    }

    /// Use a different image for the agent container
    pub fn with_agent_image(mut self, image: &str) -> Self {
        self.agent_image = image.to_string();
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Resolved readiness wait for each attach
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The configured targets. No cluster query is made.
    pub fn targets(&self) -> DisruptorResult<Vec<String>> {
        Ok(self.targets.clone())
    }

    /// Attach the agent container to every target pod.
    ///
    /// Targets that already run the agent are left untouched.
    #[instrument(skip(self), fields(namespace = %self.namespace, targets = self.targets.len()))]
    pub async fn inject_disruptor_agent(&self) -> DisruptorResult<()> {
        let container = agent_container(&self.agent_image);
        let options = AttachOptions {
            timeout: self.timeout,
            ignore_if_exists: true,
        };

        let tasks = self.targets.iter().map(|pod| {
            let helper = Arc::clone(&self.helper);
            let cancel = self.cancel.clone();
            let container = container.clone();
            let pod = pod.clone();

            async move {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(DisruptorError::Cancelled { pod: pod.clone() }),
                    res = helper.attach_ephemeral_container(&pod, container, options) => {
                        res.map_err(|source| DisruptorError::Injection { pod: pod.clone(), source })
                    }
                };

                let outcome = if result.is_ok() { "success" } else { "failure" };
                metrics::counter!("disruptor_agent_injections_total", 1, "outcome" => outcome);
                if result.is_ok() {
                    debug!(pod = %pod, "Agent injected");
                }
                result
            }
        });

        let result = first_error(tasks).await;
        if result.is_ok() {
            info!("Agent injected in all targets");
        }
        result
    }

    /// Execute the same command in the agent of every target
    pub async fn exec_command(&self, command: Vec<String>) -> DisruptorResult<()> {
        self.visit(&CommandVisitor::new(command)).await
    }

    /// Execute in each target the commands returned by the visitor.
    ///
    /// When the command fails in a target, the visitor's cleanup command is
    /// executed in that target and the original failure is reported.
    #[instrument(skip(self, visitor), fields(namespace = %self.namespace, targets = self.targets.len()))]
    pub async fn visit<V: Visitor + ?Sized>(&self, visitor: &V) -> DisruptorResult<()> {
        let tasks: Vec<_> = self
            .targets
            .iter()
            .map(|pod| {
                let commands = visitor.visit(pod);
                let helper = Arc::clone(&self.helper);
                let cancel = self.cancel.clone();
                let pod = pod.clone();

                async move {
                    let commands = commands?;
                    visit_target(helper, cancel, pod, commands).await
                }
            })
            .collect();

        first_error(tasks).await
    }
}

async fn visit_target(
    helper: Arc<dyn PodHelper>,
    cancel: CancellationToken,
    pod: String,
    commands: VisitCommands,
) -> DisruptorResult<()> {
    // nothing was started, so there is nothing to clean up
    if cancel.is_cancelled() {
        debug!(pod = %pod, "Agent command not started, operation cancelled");
        return Err(DisruptorError::Cancelled { pod });
    }

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        res = helper.exec(&pod, AGENT_CONTAINER_NAME, commands.exec.clone(), Vec::new()) => Some(res),
    };

    let failure = match result {
        Some(Ok(_)) => {
            metrics::counter!("disruptor_agent_commands_total", 1, "outcome" => "success");
            return Ok(());
        }
        Some(Err(source)) => {
            warn!(pod = %pod, error = %source, "Agent command failed");
            let stderr = String::from_utf8_lossy(source.stderr()).into_owned();
            DisruptorError::AgentInvocation {
                pod: pod.clone(),
                source,
                stderr,
            }
        }
        None => {
            warn!(pod = %pod, "Agent command cancelled");
            DisruptorError::Cancelled { pod: pod.clone() }
        }
    };
    metrics::counter!("disruptor_agent_commands_total", 1, "outcome" => "failure");

    if !commands.cleanup.is_empty() {
        metrics::counter!("disruptor_agent_cleanups_total", 1);
        if let Err(e) = helper
            .exec(&pod, AGENT_CONTAINER_NAME, commands.cleanup, Vec::new())
            .await
        {
            warn!(pod = %pod, error = %e, "Cleanup command failed");
        }
    }

    Err(failure)
}

/// Run every task to completion and return the first error reported.
async fn first_error<I, F>(tasks: I) -> DisruptorResult<()>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = DisruptorResult<()>> + Send + 'static,
{
    let tasks: Vec<F> = tasks.into_iter().collect();
    let total = tasks.len();

    // room for one error per task, so no task ever waits on a send
    let (tx, mut rx) = mpsc::channel(total.max(1));
    let mut set = JoinSet::new();
    for task in tasks {
        let tx = tx.clone();
        set.spawn(async move {
            if let Err(e) = task.await {
                let _ = tx.try_send(e);
            }
        });
    }
    drop(tx);

    let mut panicked = None;
    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "Agent task did not complete");
            panicked.get_or_insert_with(|| DisruptorError::TaskFailed(e.to_string()));
        }
    }

    let first = rx.try_recv().ok();
    let mut failed = usize::from(first.is_some());
    while let Ok(other) = rx.try_recv() {
        debug!(error = %other, "Additional target failure");
        failed += 1;
    }

    match first.or(panicked) {
        Some(err) => {
            warn!(failed, total, "Operation failed in some targets");
            Err(err)
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::fake::FakePodHelper;
    use crate::k8s::{K8sError, MockPodHelper};

    fn targets(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_inject_timeout_from_secs() {
        assert_eq!(InjectTimeout::from_secs(0), InjectTimeout::UseDefault);
        assert_eq!(InjectTimeout::from_secs(-1), InjectTimeout::NoWait);
        assert_eq!(
            InjectTimeout::from_secs(5),
            InjectTimeout::WaitUpTo(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_inject_timeout_resolve() {
        assert_eq!(InjectTimeout::UseDefault.resolve(), Duration::from_secs(30));
        assert_eq!(InjectTimeout::NoWait.resolve(), Duration::ZERO);
        assert_eq!(
            InjectTimeout::WaitUpTo(Duration::from_millis(250)).resolve(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_targets_returns_configuration() {
        let helper = Arc::new(FakePodHelper::new("test-ns"));
        let controller = AgentController::new(
            CancellationToken::new(),
            helper,
            "test-ns",
            targets(&["pod2", "pod1", "pod1"]),
            InjectTimeout::default(),
        );

        assert_eq!(controller.targets().unwrap(), vec!["pod2", "pod1", "pod1"]);
        assert_eq!(controller.timeout(), DEFAULT_INJECT_TIMEOUT);
    }

    #[tokio::test]
    async fn test_first_error_empty() {
        let tasks: Vec<std::future::Ready<DisruptorResult<()>>> = Vec::new();
        assert!(first_error(tasks).await.is_ok());
    }

    #[tokio::test]
    async fn test_first_error_runs_all_tasks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tasks = (0..5).map(|i| {
            let tx = tx.clone();
            async move {
                tx.send(i).unwrap();
                if i % 2 == 0 {
                    Err(DisruptorError::visitor(&format!("pod{}", i), "failed"))
                } else {
                    Ok(())
                }
            }
        });

        let err = first_error(tasks).await.unwrap_err();
        assert!(matches!(err, DisruptorError::Visitor { .. }));

        drop(tx);
        let mut seen = Vec::new();
        while let Some(i) = rx.recv().await {
            seen.push(i);
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_first_error_reports_panicked_task() {
        async fn task(panics: bool) -> DisruptorResult<()> {
            if panics {
                panic!("agent task panicked");
            }
            Ok(())
        }

        let err = first_error(vec![task(false), task(true)]).await.unwrap_err();
        assert!(matches!(err, DisruptorError::TaskFailed(_)));
    }

    #[tokio::test]
    async fn test_injection_error_names_pod() {
        let mut helper = MockPodHelper::new();
        helper
            .expect_attach_ephemeral_container()
            .withf(|pod, container, options| {
                container.name == AGENT_CONTAINER_NAME && options.ignore_if_exists && !pod.is_empty()
            })
            .times(2)
            .returning(|pod, _, _| {
                if pod == "pod2" {
                    Err(K8sError::PodNotFound { name: pod.into() })
                } else {
                    Ok(())
                }
            });

        let controller = AgentController::new(
            CancellationToken::new(),
            Arc::new(helper),
            "test-ns",
            targets(&["pod1", "pod2"]),
            InjectTimeout::NoWait,
        );

        let err = controller.inject_disruptor_agent().await.unwrap_err();
        assert_eq!(err.pod(), Some("pod2"));
        assert!(matches!(err, DisruptorError::Injection { .. }));
    }

    #[tokio::test]
    async fn test_inject_uses_resolved_timeout() {
        let mut helper = MockPodHelper::new();
        helper
            .expect_attach_ephemeral_container()
            .withf(|_, _, options| options.timeout == Duration::from_secs(7))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let controller = AgentController::new(
            CancellationToken::new(),
            Arc::new(helper),
            "test-ns",
            targets(&["pod1"]),
            InjectTimeout::WaitUpTo(Duration::from_secs(7)),
        );

        controller.inject_disruptor_agent().await.unwrap();
    }

    #[tokio::test]
    async fn test_inject_uses_configured_image() {
        let mut helper = MockPodHelper::new();
        helper
            .expect_attach_ephemeral_container()
            .withf(|_, container, _| container.image.as_deref() == Some("registry.local/agent:v2"))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let controller = AgentController::new(
            CancellationToken::new(),
            Arc::new(helper),
            "test-ns",
            targets(&["pod1"]),
            InjectTimeout::NoWait,
        )
        .with_agent_image("registry.local/agent:v2");

        controller.inject_disruptor_agent().await.unwrap();
    }

    #[tokio::test]
    async fn test_inject_cancelled() {
        let helper = Arc::new(FakePodHelper::new("test-ns").with_pod("pod1", &[]));
        let cancel = CancellationToken::new();
        let controller = AgentController::new(
            cancel.clone(),
            helper,
            "test-ns",
            targets(&["pod1"]),
            InjectTimeout::WaitUpTo(Duration::from_secs(60)),
        );

        cancel.cancel();
        let err = controller.inject_disruptor_agent().await.unwrap_err();
        assert!(matches!(err, DisruptorError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_inject_cancelled_in_flight() {
        let helper = FakePodHelper::new("test-ns").with_pod("pod1", &[]);
        let cancel = CancellationToken::new();
        let controller = AgentController::new(
            cancel.clone(),
            Arc::new(helper.clone()),
            "test-ns",
            targets(&["pod1"]),
            InjectTimeout::WaitUpTo(Duration::from_secs(60)),
        );

        let injecting = tokio::spawn(async move { controller.inject_disruptor_agent().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let err = tokio::time::timeout(Duration::from_secs(5), injecting)
            .await
            .expect("injection did not stop after cancellation")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, DisruptorError::Cancelled { .. }));
        // the attach request was issued before cancellation
        assert_eq!(helper.ephemeral_containers("pod1"), vec![AGENT_CONTAINER_NAME]);
    }

    #[tokio::test]
    async fn test_cleanup_failure_reports_original_error() {
        let mut helper = MockPodHelper::new();
        helper
            .expect_exec()
            .withf(|_, container, command, _| {
                container.to_string() == AGENT_CONTAINER_NAME && command == &vec!["command".to_string()]
            })
            .times(1)
            .returning(|_, _, _, _| {
                Err(K8sError::Exec {
                    message: "exit code 2".to_string(),
                    stderr: b"port already in use".to_vec(),
                })
            });
        helper
            .expect_exec()
            .withf(|_, _, command, _| command == &vec!["cleanup".to_string()])
            .times(1)
            .returning(|_, _, _, _| {
                Err(K8sError::Api {
                    message: "connection reset".to_string(),
                })
            });

        let controller = AgentController::new(
            CancellationToken::new(),
            Arc::new(helper),
            "test-ns",
            targets(&["pod1"]),
            InjectTimeout::NoWait,
        );

        let visitor = |_: &str| -> DisruptorResult<VisitCommands> {
            Ok(VisitCommands::new(
                vec!["command".to_string()],
                vec!["cleanup".to_string()],
            ))
        };
        let err = controller.visit(&visitor).await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("port already in use"));
        assert!(!message.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_visitor_failure_skips_target() {
        let helper = FakePodHelper::new("test-ns");
        let controller = AgentController::new(
            CancellationToken::new(),
            Arc::new(helper.clone()),
            "test-ns",
            targets(&["pod1", "pod2"]),
            InjectTimeout::NoWait,
        );

        let visitor = |pod: &str| {
            if pod == "pod1" {
                Err(DisruptorError::visitor(pod, "no port exposed"))
            } else {
                Ok(VisitCommands::new(vec!["command".to_string()], Vec::new()))
            }
        };
        let err = controller.visit(&visitor).await.unwrap_err();

        assert_eq!(err.pod(), Some("pod1"));
        let history = helper.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].pod, "pod2");
    }

    #[tokio::test]
    async fn test_visit_cancelled_before_start_runs_nothing() {
        let helper = FakePodHelper::new("test-ns");
        let cancel = CancellationToken::new();
        let controller = AgentController::new(
            cancel.clone(),
            Arc::new(helper.clone()),
            "test-ns",
            targets(&["pod1"]),
            InjectTimeout::NoWait,
        );
        cancel.cancel();

        let visitor = |_: &str| -> DisruptorResult<VisitCommands> {
            Ok(VisitCommands::new(
                vec!["command".to_string()],
                vec!["cleanup".to_string()],
            ))
        };
        let err = controller.visit(&visitor).await.unwrap_err();

        assert!(matches!(err, DisruptorError::Cancelled { .. }));
        assert!(helper.history().is_empty());
    }

    /// Records every exec and blocks on anything but the cleanup command
    struct SlowExecHelper {
        inner: FakePodHelper,
    }

    #[async_trait::async_trait]
    impl PodHelper for SlowExecHelper {
        async fn attach_ephemeral_container(
            &self,
            pod: &str,
            container: k8s_openapi::api::core::v1::EphemeralContainer,
            options: AttachOptions,
        ) -> crate::k8s::K8sResult<()> {
            self.inner.attach_ephemeral_container(pod, container, options).await
        }

        async fn exec(
            &self,
            pod: &str,
            container: &str,
            command: Vec<String>,
            stdin: Vec<u8>,
        ) -> crate::k8s::K8sResult<crate::k8s::ExecOutput> {
            let blocks = command != vec!["cleanup".to_string()];
            let output = self.inner.exec(pod, container, command, stdin).await?;
            if blocks {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(output)
        }

        async fn list_pods(
            &self,
            selector: &crate::k8s::PodSelector,
        ) -> crate::k8s::K8sResult<Vec<String>> {
            self.inner.list_pods(selector).await
        }
    }

    #[tokio::test]
    async fn test_visit_cancelled_in_flight_runs_cleanup() {
        let helper = FakePodHelper::new("test-ns");
        let cancel = CancellationToken::new();
        let controller = AgentController::new(
            cancel.clone(),
            Arc::new(SlowExecHelper {
                inner: helper.clone(),
            }),
            "test-ns",
            targets(&["pod1"]),
            InjectTimeout::NoWait,
        );

        let running = tokio::spawn(async move {
            let visitor = |_: &str| -> DisruptorResult<VisitCommands> {
                Ok(VisitCommands::new(
                    vec!["command".to_string()],
                    vec!["cleanup".to_string()],
                ))
            };
            controller.visit(&visitor).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let err = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("visit did not stop after cancellation")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, DisruptorError::Cancelled { .. }));

        let history = helper.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].command, vec!["command"]);
        assert_eq!(history[1].command, vec!["cleanup"]);
    }
}
