use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{TrayError, TrayResult};
use crate::executor::{CommandExecutor, KubectlOp};
use crate::model::{ForwardPorts, PollSnapshot};
use crate::settings::{SettingsStore, port_from_key, port_to_key};
use crate::surface::{Notifier, UiSurface};

#[derive(Debug, Clone)]
pub struct ForwardSession {
    pub pod_name: String,
    pub ports: ForwardPorts,
    pub id: u64,
    pub cancel: CancellationToken,
}

/// Owns every running port-forward, at most one per pod name.
pub struct SessionManager {
    executor: Arc<dyn CommandExecutor>,
    settings: Arc<dyn SettingsStore>,
    notifier: Arc<dyn Notifier>,
    surface: Arc<dyn UiSurface>,
    sessions: Mutex<HashMap<String, ForwardSession>>,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        settings: Arc<dyn SettingsStore>,
        notifier: Arc<dyn Notifier>,
        surface: Arc<dyn UiSurface>,
    ) -> Self {
        Self {
            executor,
            settings,
            notifier,
            surface,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn start(self: &Arc<Self>, pod: &str, ports: ForwardPorts) -> TrayResult<ForwardSession> {
        if !ports.is_complete() {
            return Err(TrayError::parse(
                "port-forward",
                format!("both ports are required for {pod}, got '{ports}'"),
            ));
        }

        let session = {
            let mut sessions = self.table();
            if sessions.contains_key(pod) {
                return Err(TrayError::SessionConflict {
                    pod: pod.to_string(),
                });
            }
            let session = ForwardSession {
                pod_name: pod.to_string(),
                ports,
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                cancel: CancellationToken::new(),
            };
            sessions.insert(pod.to_string(), session.clone());
            session
        };
        info!("port-forward started for {pod} {}", session.ports);

        let manager = Arc::clone(self);
        let running = session.clone();
        tokio::spawn(async move {
            manager.run_session(running).await;
        });

        self.surface.refresh();
        Ok(session)
    }

    /// Returns false when the pod had no session.
    pub fn stop(&self, pod: &str) -> bool {
        let Some(session) = self.table().remove(pod) else {
            return false;
        };
        session.cancel.cancel();
        info!("port-forward stopped for {pod} {}", session.ports);
        self.surface.refresh();
        true
    }

    pub fn stop_all(&self) -> usize {
        let stopped = self
            .table()
            .drain()
            .map(|(_, session)| session)
            .collect::<Vec<_>>();
        self.cancel_stopped(stopped)
    }

    /// Stops sessions whose pod is missing from `snapshot`.
    pub fn retain_pods(&self, snapshot: &PollSnapshot) -> Vec<String> {
        let stopped = {
            let mut sessions = self.table();
            let gone = sessions
                .keys()
                .filter(|pod| !snapshot.contains(pod))
                .cloned()
                .collect::<Vec<_>>();
            gone.iter()
                .filter_map(|pod| sessions.remove(pod))
                .collect::<Vec<_>>()
        };
        let mut names = stopped
            .iter()
            .map(|session| session.pod_name.clone())
            .collect::<Vec<_>>();
        names.sort();
        self.cancel_stopped(stopped);
        names
    }

    pub fn is_forwarding(&self, pod: &str) -> bool {
        self.table().contains_key(pod)
    }

    pub fn session(&self, pod: &str) -> Option<ForwardSession> {
        self.table().get(pod).cloned()
    }

    pub fn sessions(&self) -> Vec<ForwardSession> {
        let mut sessions = self.table().values().cloned().collect::<Vec<_>>();
        sessions.sort_by(|left, right| left.pod_name.cmp(&right.pod_name));
        sessions
    }

    /// Last ports saved for `pod`; empty strings when never set.
    pub fn ports(&self, pod: &str) -> ForwardPorts {
        ForwardPorts::new(
            self.settings.get(&port_from_key(pod)),
            self.settings.get(&port_to_key(pod)),
        )
    }

    pub fn set_source_port(&self, pod: &str, source: &str) -> bool {
        let target = self.ports(pod).target;
        self.set_ports(pod, ForwardPorts::new(source, target))
    }

    pub fn set_target_port(&self, pod: &str, target: &str) -> bool {
        let source = self.ports(pod).source;
        self.set_ports(pod, ForwardPorts::new(source, target))
    }

    /// Persists the ports. A change stops the pod's running session so it
    /// never keeps forwarding on the old ports. Returns whether one stopped.
    pub fn set_ports(&self, pod: &str, ports: ForwardPorts) -> bool {
        let saved = self.ports(pod);
        if saved == ports {
            return false;
        }
        if saved.source != ports.source {
            self.persist(&port_from_key(pod), &ports.source);
        }
        if saved.target != ports.target {
            self.persist(&port_to_key(pod), &ports.target);
        }
        self.stop(pod)
    }

    fn persist(&self, key: &str, value: &str) {
        if let Err(error) = self.settings.set(key, value) {
            warn!("failed to save {key}: {error:#}");
            self.notifier
                .warn("Settings not saved", &format!("{key}: {error:#}"));
        }
    }

    async fn run_session(&self, session: ForwardSession) {
        let op = KubectlOp::PortForward {
            pod: session.pod_name.clone(),
            ports: session.ports.clone(),
        };
        let result = self
            .executor
            .run_until_cancelled(&op, session.cancel.clone())
            .await;
        if session.cancel.is_cancelled() {
            debug!("port-forward task for {} finished", session.pod_name);
            return;
        }

        // The process went away by itself; drop the entry unless a newer
        // session already replaced it.
        let removed = {
            let mut sessions = self.table();
            match sessions.get(&session.pod_name) {
                Some(current) if current.id == session.id => sessions.remove(&session.pod_name),
                _ => None,
            }
        };
        if removed.is_none() {
            return;
        }

        match result {
            Ok(()) => info!("port-forward for {} exited", session.pod_name),
            Err(error) => {
                warn!("port-forward for {} ended: {error}", session.pod_name);
                self.notifier.warn(
                    "Port-forward stopped",
                    &format!("{} {}: {error}", session.pod_name, session.ports),
                );
            }
        }
        self.surface.refresh();
    }

    fn cancel_stopped(&self, stopped: Vec<ForwardSession>) -> usize {
        for session in &stopped {
            session.cancel.cancel();
            info!("port-forward stopped for {} {}", session.pod_name, session.ports);
        }
        if !stopped.is_empty() {
            self.surface.refresh();
        }
        stopped.len()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, ForwardSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
