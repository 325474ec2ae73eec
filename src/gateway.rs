use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{TrayError, TrayResult};
use crate::executor::{CommandExecutor, CommandOutput, KubectlOp};
use crate::model::{ClusterContext, Pod, PodDetails, PollSnapshot};
use crate::parse;
use crate::surface::Notifier;

/// Typed kubectl queries. Every failure is logged and raised on the
/// notifier before it is returned, so callers only decide what to show.
#[derive(Clone)]
pub struct ClusterGateway {
    executor: Arc<dyn CommandExecutor>,
    notifier: Arc<dyn Notifier>,
}

impl ClusterGateway {
    pub fn new(executor: Arc<dyn CommandExecutor>, notifier: Arc<dyn Notifier>) -> Self {
        Self { executor, notifier }
    }

    pub async fn check_connection(&self) -> bool {
        self.read(KubectlOp::ClusterInfo).await.is_ok()
    }

    pub async fn list_contexts(&self) -> TrayResult<Vec<ClusterContext>> {
        let raw = self.read(KubectlOp::GetContexts).await?;
        Ok(parse::parse_contexts(&raw))
    }

    pub async fn current_context(&self) -> TrayResult<String> {
        let raw = self.read(KubectlOp::CurrentContext).await?;
        Ok(raw.trim().to_string())
    }

    pub async fn list_namespaces(&self) -> TrayResult<Vec<String>> {
        let raw = self.read(KubectlOp::GetNamespaces).await?;
        Ok(parse::parse_namespace_names(&raw))
    }

    pub async fn list_pods(&self) -> TrayResult<Vec<Pod>> {
        let raw = self.read(KubectlOp::GetPods).await?;
        self.reported(parse::parse_pods(&raw))
    }

    pub async fn describe_pod(&self, name: &str) -> TrayResult<PodDetails> {
        let raw = self.read(KubectlOp::GetPod(name.to_string())).await?;
        self.reported(parse::parse_pod_details(&raw))
    }

    pub async fn list_pod_names(&self) -> TrayResult<PollSnapshot> {
        let raw = self.read(KubectlOp::GetPodNames).await?;
        Ok(parse::parse_pod_names(&raw))
    }

    pub async fn use_context(&self, name: &str) -> TrayResult<CommandOutput> {
        self.mutate(KubectlOp::UseContext(name.to_string())).await
    }

    pub async fn set_namespace(&self, name: &str) -> TrayResult<CommandOutput> {
        self.mutate(KubectlOp::SetNamespace(name.to_string())).await
    }

    /// Raises a failure that did not originate in this gateway.
    pub fn report(&self, error: &TrayError) {
        warn!("{error}");
        self.notifier.warn(error.title(), &error.to_string());
    }

    async fn read(&self, op: KubectlOp) -> TrayResult<String> {
        let output = self.reported(self.executor.output(&op).await)?;
        if !output.success {
            return self.reported(Err(TrayError::gateway(
                op.label(),
                output.failure_reason(),
            )));
        }
        debug!("kubectl {} returned {} bytes", op.label(), output.stdout.len());
        Ok(output.stdout)
    }

    /// Mutating commands hand back the raw output, failed exits included,
    /// because the caller classifies the text itself.
    async fn mutate(&self, op: KubectlOp) -> TrayResult<CommandOutput> {
        self.reported(self.executor.output(&op).await)
    }

    fn reported<T>(&self, result: TrayResult<T>) -> TrayResult<T> {
        if let Err(error) = &result {
            self.report(error);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::ClusterGateway;
    use crate::error::TrayError;
    use crate::executor::{CommandOutput, KubectlOp};
    use crate::testing::{FakeExecutor, RecordingNotifier};
    use std::sync::Arc;

    fn gateway(executor: &Arc<FakeExecutor>, notifier: &Arc<RecordingNotifier>) -> ClusterGateway {
        ClusterGateway::new(executor.clone(), notifier.clone())
    }

    #[tokio::test]
    async fn failed_reads_are_reported_and_returned() {
        let executor = Arc::new(FakeExecutor::default());
        let notifier = Arc::new(RecordingNotifier::default());
        executor.respond(
            KubectlOp::GetNamespaces,
            CommandOutput::failed("Unable to connect to the server"),
        );

        let error = gateway(&executor, &notifier)
            .list_namespaces()
            .await
            .unwrap_err();
        assert!(matches!(error, TrayError::Gateway { .. }));
        let warnings = notifier.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].1.contains("Unable to connect"));
    }

    #[tokio::test]
    async fn executor_errors_are_reported() {
        let executor = Arc::new(FakeExecutor::default());
        let notifier = Arc::new(RecordingNotifier::default());
        executor.fail(
            KubectlOp::GetPodNames,
            TrayError::gateway("get pod names", "timed out after 10000ms"),
        );

        assert!(gateway(&executor, &notifier).list_pod_names().await.is_err());
        assert_eq!(notifier.warnings().len(), 1);
    }

    #[tokio::test]
    async fn parse_failures_are_reported() {
        let executor = Arc::new(FakeExecutor::default());
        let notifier = Arc::new(RecordingNotifier::default());
        executor.respond(KubectlOp::GetPod("web-1".to_string()), CommandOutput::ok("{}"));

        let error = gateway(&executor, &notifier)
            .describe_pod("web-1")
            .await
            .unwrap_err();
        assert!(matches!(error, TrayError::Parse { .. }));
        assert_eq!(notifier.warnings()[0].0, "Unexpected kubectl output");
    }

    #[tokio::test]
    async fn mutating_commands_return_failed_output() {
        let executor = Arc::new(FakeExecutor::default());
        let notifier = Arc::new(RecordingNotifier::default());
        executor.respond(
            KubectlOp::UseContext("missing".to_string()),
            CommandOutput::failed("error: no context exists with the name: \"missing\""),
        );

        let output = gateway(&executor, &notifier)
            .use_context("missing")
            .await
            .unwrap();
        assert!(!output.success);
        assert!(notifier.warnings().is_empty());
    }

    #[tokio::test]
    async fn current_context_is_trimmed() {
        let executor = Arc::new(FakeExecutor::default());
        let notifier = Arc::new(RecordingNotifier::default());
        executor.respond(KubectlOp::CurrentContext, CommandOutput::ok("kind-dev\n"));

        assert_eq!(
            gateway(&executor, &notifier).current_context().await.unwrap(),
            "kind-dev"
        );
        assert_eq!(executor.calls(&KubectlOp::CurrentContext), 1);
    }
}
