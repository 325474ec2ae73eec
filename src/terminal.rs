use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command as TokioCommand;
use tracing::debug;

use crate::error::{TrayError, TrayResult};
use crate::settings::{SettingsStore, TerminalPreferences};

#[async_trait]
pub trait TerminalLauncher: Send + Sync {
    /// Opens an interactive shell; resolves when the window closes.
    async fn open_shell(&self, pod: &str, container: &str) -> TrayResult<()>;

    /// Opens a following log stream; resolves when the window closes.
    async fn open_logs(&self, pod: &str, container: &str) -> TrayResult<()>;
}

pub struct XtermLauncher {
    terminal: String,
    kubectl: String,
    settings: Arc<dyn SettingsStore>,
}

impl XtermLauncher {
    pub fn new(
        terminal: impl Into<String>,
        kubectl: impl Into<String>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            terminal: terminal.into(),
            kubectl: kubectl.into(),
            settings,
        }
    }

    fn shell_args(&self, prefs: &TerminalPreferences, pod: &str, container: &str) -> Vec<String> {
        let mut args = window_args(format!("SSH: {pod} {container}"), prefs);
        args.extend(
            [
                self.kubectl.as_str(),
                "exec",
                "-it",
                "-c",
                container,
                pod,
                "--",
                "bash",
            ]
            .map(str::to_string),
        );
        args
    }

    fn logs_args(&self, prefs: &TerminalPreferences, pod: &str, container: &str) -> Vec<String> {
        let mut args = window_args(format!("Logs: {pod} {container}"), prefs);
        args.extend([
            self.kubectl.clone(),
            "logs".to_string(),
            "-f".to_string(),
            format!("--tail={}", prefs.tail),
            "--timestamps=true".to_string(),
            "-c".to_string(),
            container.to_string(),
            pod.to_string(),
        ]);
        args
    }

    async fn run(&self, args: Vec<String>) -> TrayResult<()> {
        debug!("launching {} {:?}", self.terminal, args);
        let status = TokioCommand::new(&self.terminal)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|error| {
                TrayError::gateway(self.terminal.clone(), format!("failed to launch: {error}"))
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(TrayError::gateway(
                self.terminal.clone(),
                format!("exited with {status}"),
            ))
        }
    }
}

fn window_args(title: String, prefs: &TerminalPreferences) -> Vec<String> {
    vec![
        "-title".to_string(),
        title,
        "-geometry".to_string(),
        prefs.geometry(),
        "-e".to_string(),
    ]
}

#[async_trait]
impl TerminalLauncher for XtermLauncher {
    async fn open_shell(&self, pod: &str, container: &str) -> TrayResult<()> {
        let prefs = TerminalPreferences::load(self.settings.as_ref());
        self.run(self.shell_args(&prefs, pod, container)).await
    }

    async fn open_logs(&self, pod: &str, container: &str) -> TrayResult<()> {
        let prefs = TerminalPreferences::load(self.settings.as_ref());
        self.run(self.logs_args(&prefs, pod, container)).await
    }
}

#[cfg(test)]
mod tests {
    use super::XtermLauncher;
    use crate::settings::{SettingsStore, TAIL_KEY, TerminalPreferences, WINDOW_WIDTH_KEY};
    use crate::testing::MemorySettings;
    use std::sync::Arc;

    #[test]
    fn shell_command_targets_the_container() {
        let settings = Arc::new(MemorySettings::default());
        let launcher = XtermLauncher::new("xterm", "kubectl", settings.clone());
        let prefs = TerminalPreferences::load(settings.as_ref());

        let args = launcher.shell_args(&prefs, "web-1", "app");
        assert_eq!(
            args,
            vec![
                "-title", "SSH: web-1 app", "-geometry", "300x50", "-e", "kubectl", "exec", "-it",
                "-c", "app", "web-1", "--", "bash",
            ]
        );
    }

    #[test]
    fn logs_command_uses_saved_tail_and_geometry() {
        let settings = Arc::new(MemorySettings::default());
        settings.set(TAIL_KEY, "250").unwrap();
        settings.set(WINDOW_WIDTH_KEY, "180").unwrap();
        let launcher = XtermLauncher::new("xterm", "/usr/local/bin/kubectl", settings.clone());
        let prefs = TerminalPreferences::load(settings.as_ref());

        let args = launcher.logs_args(&prefs, "web-1", "app");
        assert_eq!(args[3], "180x50");
        assert_eq!(args[5], "/usr/local/bin/kubectl");
        assert!(args.contains(&"--tail=250".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("web-1"));
    }
}
