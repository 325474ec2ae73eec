//! Scripted collaborators shared by the unit tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

use crate::error::{TrayError, TrayResult};
use crate::executor::{CommandExecutor, CommandOutput, KubectlOp};
use crate::settings::SettingsStore;
use crate::surface::{Notifier, UiSurface};
use crate::terminal::TerminalLauncher;

/// Replies from per-operation queues. The last queued reply sticks.
#[derive(Default)]
pub struct FakeExecutor {
    replies: Mutex<HashMap<KubectlOp, VecDeque<TrayResult<CommandOutput>>>>,
    calls: Mutex<Vec<KubectlOp>>,
    forward_exits: Mutex<HashMap<String, TrayError>>,
    running_forwards: AtomicUsize,
}

impl FakeExecutor {
    pub fn respond(&self, op: KubectlOp, output: CommandOutput) {
        self.push(op, Ok(output));
    }

    pub fn fail(&self, op: KubectlOp, error: TrayError) {
        self.push(op, Err(error));
    }

    /// Replaces whatever is queued for `op`.
    pub fn set(&self, op: KubectlOp, output: CommandOutput) {
        self.replies
            .lock()
            .unwrap()
            .insert(op, VecDeque::from([Ok(output)]));
    }

    /// The next port-forward for `pod` exits immediately with `error`.
    pub fn exit_forward(&self, pod: &str, error: TrayError) {
        self.forward_exits
            .lock()
            .unwrap()
            .insert(pod.to_string(), error);
    }

    pub fn calls(&self, op: &KubectlOp) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| *call == op)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn mutating_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.is_mutating())
            .count()
    }

    pub fn running_forwards(&self) -> usize {
        self.running_forwards.load(Ordering::SeqCst)
    }

    fn push(&self, op: KubectlOp, reply: TrayResult<CommandOutput>) {
        self.replies
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back(reply);
    }
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn output(&self, op: &KubectlOp) -> TrayResult<CommandOutput> {
        self.calls.lock().unwrap().push(op.clone());
        let mut replies = self.replies.lock().unwrap();
        let Some(queue) = replies.get_mut(op) else {
            return Err(TrayError::gateway(op.label(), "no scripted reply"));
        };
        if queue.len() > 1 {
            queue
                .pop_front()
                .unwrap_or_else(|| Err(TrayError::gateway(op.label(), "empty")))
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(TrayError::gateway(op.label(), "empty")))
        }
    }

    async fn run_until_cancelled(
        &self,
        op: &KubectlOp,
        cancel: CancellationToken,
    ) -> TrayResult<()> {
        self.calls.lock().unwrap().push(op.clone());
        if let KubectlOp::PortForward { pod, .. } = op
            && let Some(error) = self.forward_exits.lock().unwrap().remove(pod)
        {
            return Err(error);
        }
        self.running_forwards.fetch_add(1, Ordering::SeqCst);
        cancel.cancelled().await;
        self.running_forwards.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    warnings: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn warnings(&self) -> Vec<(String, String)> {
        self.warnings.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn warn(&self, title: &str, message: &str) {
        self.warnings
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
    }
}

#[derive(Default)]
pub struct RecordingSurface {
    refreshes: AtomicUsize,
    closed: Mutex<Vec<String>>,
}

impl RecordingSurface {
    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }
}

impl UiSurface for RecordingSurface {
    fn refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }

    fn close_detail_view(&self, pod: &str) {
        self.closed.lock().unwrap().push(pod.to_string());
    }
}

#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<BTreeMap<String, String>>,
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> String {
        self.values
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingLauncher {
    launched: Mutex<Vec<String>>,
    failure: Mutex<Option<TrayError>>,
}

impl RecordingLauncher {
    pub fn launched(&self) -> Vec<String> {
        self.launched.lock().unwrap().clone()
    }

    pub fn fail_with(&self, error: TrayError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    fn record(&self, entry: String) -> TrayResult<()> {
        self.launched.lock().unwrap().push(entry);
        match self.failure.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TerminalLauncher for RecordingLauncher {
    async fn open_shell(&self, pod: &str, container: &str) -> TrayResult<()> {
        self.record(format!("shell {pod}/{container}"))
    }

    async fn open_logs(&self, pod: &str, container: &str) -> TrayResult<()> {
        self.record(format!("logs {pod}/{container}"))
    }
}

pub fn contexts_output(current: &str, rows: &[(&str, Option<&str>)]) -> CommandOutput {
    let rendered = rows
        .iter()
        .map(|(name, namespace)| {
            let marker = if *name == current { "*" } else { " " };
            match namespace {
                Some(namespace) => format!("{marker}   {name}   {name}   {name}   {namespace}"),
                None => format!("{marker}   {name}   {name}   {name}"),
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    CommandOutput::ok(rendered)
}

pub fn namespaces_output(names: &[&str]) -> CommandOutput {
    CommandOutput::ok(
        names
            .iter()
            .map(|name| format!("namespace/{name}"))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

pub fn pods_output(names: &[&str]) -> CommandOutput {
    CommandOutput::ok(
        names
            .iter()
            .map(|name| format!("{name}   1/1   Running   0   5m"))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

pub fn pod_names_output(names: &[&str]) -> CommandOutput {
    CommandOutput::ok(names.join(" "))
}

/// `kubectl get pods <name> -o json` for a single-container pod.
pub fn pod_json(name: &str, container: &str) -> CommandOutput {
    CommandOutput::ok(format!(
        r#"{{
  "apiVersion": "v1",
  "kind": "Pod",
  "metadata": {{"name": "{name}", "creationTimestamp": "2024-03-02T10:15:00Z"}},
  "spec": {{"containers": [{{"name": "{container}", "image": "nginx:1.27"}}]}},
  "status": {{
    "containerStatuses": [
      {{"name": "{container}", "image": "nginx:1.27", "imageID": "", "ready": true, "restartCount": 0}}
    ]
  }}
}}"#
    ))
}
