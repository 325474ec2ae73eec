use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command as TokioCommand;
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{TrayError, TrayResult};
use crate::model::ForwardPorts;

/// The closed set of kubectl invocations the tray issues.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum KubectlOp {
    ClusterInfo,
    GetContexts,
    CurrentContext,
    UseContext(String),
    GetNamespaces,
    SetNamespace(String),
    GetPods,
    GetPod(String),
    GetPodNames,
    PortForward { pod: String, ports: ForwardPorts },
}

impl KubectlOp {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ClusterInfo => "cluster-info",
            Self::GetContexts => "get-contexts",
            Self::CurrentContext => "current-context",
            Self::UseContext(_) => "use-context",
            Self::GetNamespaces => "get namespaces",
            Self::SetNamespace(_) => "set-context --namespace",
            Self::GetPods => "get pods",
            Self::GetPod(_) => "get pod",
            Self::GetPodNames => "get pod names",
            Self::PortForward { .. } => "port-forward",
        }
    }

    #[cfg(test)]
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::UseContext(_) | Self::SetNamespace(_))
    }

    pub fn args(&self) -> Vec<String> {
        let args: Vec<&str> = match self {
            Self::ClusterInfo => vec!["cluster-info", "--request-timeout=5s"],
            Self::GetContexts => vec!["config", "get-contexts", "--no-headers"],
            Self::CurrentContext => vec!["config", "current-context"],
            Self::UseContext(name) => vec!["config", "use-context", name.as_str()],
            Self::GetNamespaces => vec!["get", "namespaces", "-o", "name"],
            Self::SetNamespace(name) => {
                vec!["config", "set-context", "--current", "--namespace", name.as_str()]
            }
            Self::GetPods => vec!["get", "pods", "--no-headers"],
            Self::GetPod(name) => vec!["get", "pods", name.as_str(), "-o", "json"],
            Self::GetPodNames => vec!["get", "pods", "-o", "jsonpath={.items[*].metadata.name}"],
            Self::PortForward { pod, ports } => {
                return vec![
                    "port-forward".to_string(),
                    pod.clone(),
                    ports.mapping(),
                ];
            }
        };
        args.into_iter().map(str::to_string).collect()
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub status: String,
}

impl CommandOutput {
    #[cfg(test)]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
            status: "exit status: 0".to_string(),
        }
    }

    #[cfg(test)]
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
            status: "exit status: 1".to_string(),
        }
    }

    /// stdout and stderr joined and trimmed, the way a combined pipe reads.
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, _) => stderr.to_string(),
            (false, true) => stdout.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }

    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("kubectl exited with {}", self.status)
        } else {
            stderr.to_string()
        }
    }
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Runs a short-lived command to completion. Only spawn errors and
    /// timeouts are `Err`; a non-zero exit comes back in the output.
    async fn output(&self, op: &KubectlOp) -> TrayResult<CommandOutput>;

    /// Runs a long-lived command until it exits or `cancel` fires.
    async fn run_until_cancelled(
        &self,
        op: &KubectlOp,
        cancel: CancellationToken,
    ) -> TrayResult<()>;
}

#[derive(Debug, Clone)]
pub struct KubectlExecutor {
    program: String,
    command_timeout: Duration,
}

impl KubectlExecutor {
    pub fn new(program: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            command_timeout,
        }
    }

    fn command(&self, op: &KubectlOp) -> TokioCommand {
        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(op.args()).stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl CommandExecutor for KubectlExecutor {
    async fn output(&self, op: &KubectlOp) -> TrayResult<CommandOutput> {
        let mut cmd = self.command(op);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        debug!("running {} {:?}", self.program, op.args());

        let output = match timeout(self.command_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => {
                return Err(TrayError::gateway(
                    op.label(),
                    format!("failed to execute {}: {error}", self.program),
                ));
            }
            Err(_) => {
                return Err(TrayError::gateway(
                    op.label(),
                    format!("timed out after {}ms", self.command_timeout.as_millis()),
                ));
            }
        };

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            status: output.status.to_string(),
        })
    }

    async fn run_until_cancelled(
        &self,
        op: &KubectlOp,
        cancel: CancellationToken,
    ) -> TrayResult<()> {
        let mut child = self
            .command(op)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|error| {
                TrayError::gateway(
                    op.label(),
                    format!("failed to spawn {}: {error}", self.program),
                )
            })?;
        debug!("started {} {:?} pid={:?}", self.program, op.args(), child.id());

        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(error) = child.kill().await {
                    warn!("failed to stop kubectl {}: {error}", op.label());
                }
                Ok(())
            }
            status = child.wait() => {
                let status = status.map_err(|error| {
                    TrayError::gateway(op.label(), format!("wait failed: {error}"))
                })?;
                if status.success() {
                    Ok(())
                } else {
                    Err(TrayError::gateway(op.label(), format!("exited with {status}")))
                }
            }
        }
    }
}
