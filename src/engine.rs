use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{TrayError, TrayResult};
use crate::executor::CommandExecutor;
use crate::gateway::ClusterGateway;
use crate::model::{ForwardPorts, Pod};
use crate::reconciler::{PodWatcher, WatcherConfig};
use crate::sessions::{ForwardSession, SessionManager};
use crate::settings::{SettingsStore, TerminalPreferences};
use crate::store::StateStore;
use crate::surface::{Notifier, UiSurface};
use crate::switcher::{MutationSerializer, SwitchOutcome};
use crate::terminal::TerminalLauncher;

/// The outside world the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn CommandExecutor>,
    pub notifier: Arc<dyn Notifier>,
    pub surface: Arc<dyn UiSurface>,
    pub settings: Arc<dyn SettingsStore>,
    pub launcher: Arc<dyn TerminalLauncher>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConfig {
    pub watcher: WatcherConfig,
    pub startup_delay: Duration,
}

/// Every operator action goes through here.
pub struct Engine {
    store: Arc<StateStore>,
    serializer: MutationSerializer,
    sessions: Arc<SessionManager>,
    watcher: Arc<PodWatcher>,
    settings: Arc<dyn SettingsStore>,
    launcher: Arc<dyn TerminalLauncher>,
    notifier: Arc<dyn Notifier>,
    surface: Arc<dyn UiSurface>,
    startup_delay: Duration,
}

impl Engine {
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Self {
        let Collaborators {
            executor,
            notifier,
            surface,
            settings,
            launcher,
        } = collaborators;

        let store = Arc::new(StateStore::new(ClusterGateway::new(
            executor.clone(),
            notifier.clone(),
        )));
        let sessions = Arc::new(SessionManager::new(
            executor,
            settings.clone(),
            notifier.clone(),
            surface.clone(),
        ));
        let watcher = Arc::new(PodWatcher::new(
            store.clone(),
            sessions.clone(),
            surface.clone(),
            notifier.clone(),
            config.watcher,
        ));

        Self {
            serializer: MutationSerializer::new(store.clone()),
            store,
            sessions,
            watcher,
            settings,
            launcher,
            notifier,
            surface,
            startup_delay: config.startup_delay,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn watcher(&self) -> &PodWatcher {
        &self.watcher
    }

    /// Waits out the startup delay, then loads everything and starts the
    /// pod watcher if the cluster answers. Returns whether it did.
    pub async fn bootstrap(&self) -> bool {
        if !self.startup_delay.is_zero() {
            info!("delaying startup by {}s", self.startup_delay.as_secs());
            tokio::time::sleep(self.startup_delay).await;
        }

        match self.refresh_all().await {
            Ok(()) => true,
            Err(error) => {
                warn!("startup refresh incomplete: {error}");
                false
            }
        }
    }

    pub async fn refresh_all(&self) -> TrayResult<()> {
        if !self.store.gateway().check_connection().await {
            self.surface.refresh();
            return Err(TrayError::gateway("cluster-info", "cluster is unreachable"));
        }

        let refreshed = self.store.refresh_all().await;
        if self.watcher.start() {
            info!("pod watcher started");
        }
        self.surface.refresh();
        refreshed
    }

    pub async fn switch_context(&self, name: &str) -> TrayResult<SwitchOutcome> {
        let outcome = self.serializer.switch_context(name).await?;
        self.after_switch(outcome).await;
        Ok(outcome)
    }

    pub async fn switch_namespace(&self, name: &str) -> TrayResult<SwitchOutcome> {
        let outcome = self.serializer.switch_namespace(name).await?;
        self.after_switch(outcome).await;
        Ok(outcome)
    }

    /// Forwards point at pods of the previous target, so they all go.
    async fn after_switch(&self, outcome: SwitchOutcome) {
        if outcome == SwitchOutcome::AlreadyActive {
            return;
        }
        let stopped = self.sessions.stop_all();
        if stopped > 0 {
            info!("stopped {stopped} port-forwards after switch");
        }
        if let Err(error) = self.store.refresh_pods().await {
            warn!("pod refresh after switch failed: {error}");
        }
        self.surface.refresh();
    }

    /// Loads container details and makes `name` the watched detail view.
    pub async fn open_pod(&self, name: &str) -> TrayResult<Pod> {
        let pod = self.store.describe_pod(name).await?;
        self.watcher.set_open_pod(name);
        Ok(pod)
    }

    pub fn close_pod(&self) {
        self.watcher.clear_open_pod();
    }

    /// Starts forwarding on the ports last saved for `pod`.
    pub fn start_forward(&self, pod: &str) -> TrayResult<ForwardSession> {
        let ports = self.sessions.ports(pod);
        self.sessions.start(pod, ports).map_err(|error| {
            self.store.gateway().report(&error);
            error
        })
    }

    pub fn stop_forward(&self, pod: &str) -> bool {
        self.sessions.stop(pod)
    }

    pub fn set_ports(&self, pod: &str, source: &str, target: &str) -> bool {
        self.sessions.set_ports(pod, ForwardPorts::new(source, target))
    }

    pub fn open_shell(&self, pod: &str, container: &str) -> JoinHandle<()> {
        let launcher = self.launcher.clone();
        let notifier = self.notifier.clone();
        let (pod, container) = (pod.to_string(), container.to_string());
        tokio::spawn(async move {
            if let Err(error) = launcher.open_shell(&pod, &container).await {
                warn!("shell for {pod}/{container} failed: {error}");
                notifier.warn("Shell failed", &error.to_string());
            }
        })
    }

    pub fn open_logs(&self, pod: &str, container: &str) -> JoinHandle<()> {
        let launcher = self.launcher.clone();
        let notifier = self.notifier.clone();
        let (pod, container) = (pod.to_string(), container.to_string());
        tokio::spawn(async move {
            if let Err(error) = launcher.open_logs(&pod, &container).await {
                warn!("logs for {pod}/{container} failed: {error}");
                notifier.warn("Logs failed", &error.to_string());
            }
        })
    }

    pub fn preferences(&self) -> TerminalPreferences {
        TerminalPreferences::load(self.settings.as_ref())
    }

    pub fn save_preferences(&self, preferences: &TerminalPreferences) -> Result<()> {
        preferences
            .save(self.settings.as_ref())
            .context("failed to save terminal preferences")
    }

    pub fn shutdown(&self) {
        self.watcher.stop();
        let stopped = self.sessions.stop_all();
        info!("shut down, {stopped} port-forwards stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::{Collaborators, Engine, EngineConfig};
    use crate::error::TrayError;
    use crate::executor::{CommandOutput, KubectlOp};
    use crate::settings::TerminalPreferences;
    use crate::switcher::SwitchOutcome;
    use crate::testing::{
        FakeExecutor, MemorySettings, RecordingLauncher, RecordingNotifier, RecordingSurface,
        contexts_output, namespaces_output, pod_json, pod_names_output, pods_output,
    };
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        executor: Arc<FakeExecutor>,
        notifier: Arc<RecordingNotifier>,
        surface: Arc<RecordingSurface>,
        launcher: Arc<RecordingLauncher>,
        engine: Engine,
    }

    fn fixture(config: EngineConfig) -> Fixture {
        let executor = Arc::new(FakeExecutor::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let surface = Arc::new(RecordingSurface::default());
        let launcher = Arc::new(RecordingLauncher::default());
        let engine = Engine::new(
            Collaborators {
                executor: executor.clone(),
                notifier: notifier.clone(),
                surface: surface.clone(),
                settings: Arc::new(MemorySettings::default()),
                launcher: launcher.clone(),
            },
            config,
        );
        Fixture {
            executor,
            notifier,
            surface,
            launcher,
            engine,
        }
    }

    fn script_cluster(executor: &FakeExecutor) {
        executor.respond(
            KubectlOp::ClusterInfo,
            CommandOutput::ok("Kubernetes control plane is running"),
        );
        executor.respond(
            KubectlOp::GetContexts,
            contexts_output("kind-dev", &[("kind-dev", None), ("prod", Some("web"))]),
        );
        executor.respond(KubectlOp::CurrentContext, CommandOutput::ok("kind-dev"));
        executor.respond(
            KubectlOp::GetNamespaces,
            namespaces_output(&["default", "web"]),
        );
        executor.respond(KubectlOp::GetPods, pods_output(&["web-1", "web-2"]));
        executor.respond(
            KubectlOp::GetPodNames,
            pod_names_output(&["web-1", "web-2"]),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_loads_state_and_starts_watcher() {
        let fx = fixture(EngineConfig::default());
        script_cluster(&fx.executor);

        assert!(fx.engine.bootstrap().await);
        let store = fx.engine.store();
        assert_eq!(store.current_context().unwrap().name, "kind-dev");
        assert_eq!(store.current_namespace().unwrap().name, "default");
        assert_eq!(store.pods().len(), 2);
        assert!(fx.engine.watcher().is_running());
        assert_eq!(fx.surface.refreshes(), 1);
        fx.engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_waits_out_the_startup_delay() {
        let fx = fixture(EngineConfig {
            startup_delay: Duration::from_secs(3),
            ..EngineConfig::default()
        });
        script_cluster(&fx.executor);

        let started = tokio::time::Instant::now();
        assert!(fx.engine.bootstrap().await);
        assert!(started.elapsed() >= Duration::from_secs(3));
        fx.engine.shutdown();
    }

    #[tokio::test]
    async fn unreachable_cluster_skips_loading() {
        let fx = fixture(EngineConfig::default());
        fx.executor.respond(
            KubectlOp::ClusterInfo,
            CommandOutput::failed("The connection to the server localhost:8080 was refused"),
        );

        assert!(!fx.engine.bootstrap().await);
        assert_eq!(fx.executor.calls(&KubectlOp::GetContexts), 0);
        assert!(!fx.engine.watcher().is_running());
        assert_eq!(fx.notifier.warnings().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn applied_switch_stops_forwards_and_reloads_pods() {
        let fx = fixture(EngineConfig::default());
        script_cluster(&fx.executor);
        fx.engine.bootstrap().await;
        fx.engine.set_ports("web-1", "8080", "80");
        fx.engine.start_forward("web-1").unwrap();
        fx.executor.respond(
            KubectlOp::UseContext("prod".to_string()),
            CommandOutput::ok("Switched to context \"prod\"."),
        );

        let outcome = fx.engine.switch_context("prod").await.unwrap();
        assert_eq!(outcome, SwitchOutcome::Applied);
        assert!(fx.engine.sessions().sessions().is_empty());
        assert_eq!(fx.executor.calls(&KubectlOp::GetPods), 2);
        fx.engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_switch_keeps_forwards() {
        let fx = fixture(EngineConfig::default());
        script_cluster(&fx.executor);
        fx.engine.bootstrap().await;
        fx.engine.set_ports("web-1", "8080", "80");
        fx.engine.start_forward("web-1").unwrap();

        let outcome = fx.engine.switch_context("kind-dev").await.unwrap();
        assert_eq!(outcome, SwitchOutcome::AlreadyActive);
        assert!(fx.engine.sessions().is_forwarding("web-1"));
        fx.engine.shutdown();
    }

    #[tokio::test]
    async fn forward_without_saved_ports_is_reported() {
        let fx = fixture(EngineConfig::default());

        let error = fx.engine.start_forward("web-1").unwrap_err();
        assert!(matches!(error, TrayError::Parse { .. }));
        assert_eq!(fx.notifier.warnings().len(), 1);
    }

    #[tokio::test]
    async fn opening_a_pod_loads_details_and_watches_it() {
        let fx = fixture(EngineConfig::default());
        fx.executor.respond(KubectlOp::GetPods, pods_output(&["web-1"]));
        fx.engine.store().refresh_pods().await.unwrap();
        fx.executor
            .respond(KubectlOp::GetPod("web-1".to_string()), pod_json("web-1", "app"));

        let pod = fx.engine.open_pod("web-1").await.unwrap();
        assert_eq!(pod.containers.len(), 1);
        assert!(pod.containers[0].ready);
        assert_eq!(fx.engine.watcher().open_pod().as_deref(), Some("web-1"));

        fx.engine.close_pod();
        assert_eq!(fx.engine.watcher().open_pod(), None);
    }

    #[tokio::test]
    async fn launcher_failures_are_notified() {
        let fx = fixture(EngineConfig::default());
        fx.engine.open_logs("web-1", "app").await.unwrap();
        assert_eq!(fx.launcher.launched(), vec!["logs web-1/app"]);
        assert!(fx.notifier.warnings().is_empty());

        fx.launcher
            .fail_with(TrayError::gateway("xterm", "failed to launch: not found"));
        fx.engine.open_shell("web-1", "app").await.unwrap();
        assert_eq!(fx.notifier.warnings()[0].0, "Shell failed");
    }

    #[tokio::test]
    async fn preferences_round_trip_through_settings() {
        let fx = fixture(EngineConfig::default());
        assert_eq!(fx.engine.preferences().geometry(), "300x50");

        let preferences = TerminalPreferences {
            width: "120".to_string(),
            height: "40".to_string(),
            tail: "200".to_string(),
        };
        fx.engine.save_preferences(&preferences).unwrap();
        assert_eq!(fx.engine.preferences(), preferences);
    }
}
