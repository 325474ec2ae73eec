use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::model::PollSnapshot;
use crate::sessions::SessionManager;
use crate::store::StateStore;
use crate::surface::{Notifier, UiSurface};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy)]
pub struct WatcherConfig {
    pub interval: Duration,
    pub grace: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            grace: DEFAULT_GRACE_PERIOD,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PollOutcome {
    /// The name listing failed; the gateway already reported it.
    Failed,
    Unchanged,
    Changed { refreshed: bool },
}

#[derive(Default)]
struct WatchState {
    previous: Option<PollSnapshot>,
    open_pod: Option<String>,
    pending_close: HashMap<String, CancellationToken>,
}

/// Polls pod names and keeps the store, the forwards and the detail view in
/// line with what the cluster reports.
pub struct PodWatcher {
    store: Arc<StateStore>,
    sessions: Arc<SessionManager>,
    surface: Arc<dyn UiSurface>,
    notifier: Arc<dyn Notifier>,
    config: WatcherConfig,
    running: AtomicBool,
    shutdown: CancellationToken,
    state: Mutex<WatchState>,
}

impl PodWatcher {
    pub fn new(
        store: Arc<StateStore>,
        sessions: Arc<SessionManager>,
        surface: Arc<dyn UiSurface>,
        notifier: Arc<dyn Notifier>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            surface,
            notifier,
            config,
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            state: Mutex::new(WatchState::default()),
        }
    }

    /// Spawns the polling loop. Returns false if it is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        let watcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(watcher.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                "watching pods every {}ms",
                watcher.config.interval.as_millis()
            );
            loop {
                tokio::select! {
                    _ = watcher.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        watcher.tick().await;
                    }
                }
            }
            debug!("pod watcher stopped");
        });
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
        for (_, pending) in self.state().pending_close.drain() {
            pending.cancel();
        }
    }

    pub fn open_pod(&self) -> Option<String> {
        self.state().open_pod.clone()
    }

    pub fn set_open_pod(&self, pod: &str) {
        let mut state = self.state();
        if let Some(previous) = state.open_pod.replace(pod.to_string())
            && previous != pod
            && let Some(pending) = state.pending_close.remove(&previous)
        {
            pending.cancel();
        }
    }

    pub fn clear_open_pod(&self) {
        let mut state = self.state();
        if let Some(previous) = state.open_pod.take()
            && let Some(pending) = state.pending_close.remove(&previous)
        {
            pending.cancel();
        }
    }

    pub fn has_pending_close(&self, pod: &str) -> bool {
        self.state().pending_close.contains_key(pod)
    }

    /// One poll. The loop calls this once per tick and never overlaps calls.
    pub async fn tick(self: &Arc<Self>) -> PollOutcome {
        let snapshot = match self.store.gateway().list_pod_names().await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                debug!("pod poll skipped: {error}");
                return PollOutcome::Failed;
            }
        };

        // The store can drift from the poll without the names changing,
        // e.g. when a refresh elsewhere failed and emptied it.
        let known = self.store.pods();
        let drifted = snapshot.grown_from(&known) || snapshot.shrunk_from(&known);
        {
            let mut state = self.state();
            if !drifted && state.previous.as_ref() == Some(&snapshot) {
                return PollOutcome::Unchanged;
            }
            state.previous = Some(snapshot.clone());
        }
        debug!("{} pod names polled, store drifted: {drifted}", snapshot.len());

        let mut refreshed = false;
        if drifted {
            match self.store.refresh_pods().await {
                Ok(()) => refreshed = true,
                Err(error) => warn!("pod refresh after poll failed: {error}"),
            }
            self.surface.refresh();
        }

        let stopped = self.sessions.retain_pods(&snapshot);
        if !stopped.is_empty() {
            info!("stopped port-forwards for removed pods: {}", stopped.join(", "));
        }

        self.watch_open_pod(&snapshot);
        PollOutcome::Changed { refreshed }
    }

    fn watch_open_pod(self: &Arc<Self>, snapshot: &PollSnapshot) {
        let mut state = self.state();
        let Some(open) = state.open_pod.clone() else {
            return;
        };

        if snapshot.contains(&open) {
            if let Some(pending) = state.pending_close.remove(&open) {
                pending.cancel();
                info!("{open} is back, keeping its view open");
            }
            return;
        }
        if state.pending_close.contains_key(&open) {
            return;
        }

        let pending = CancellationToken::new();
        state.pending_close.insert(open.clone(), pending.clone());
        drop(state);

        let grace = self.config.grace;
        warn!("{open} disappeared, closing its view in {}s", grace.as_secs());
        self.notifier.warn(
            "Pod removed",
            &format!("{open} is gone. Its view closes in {} seconds.", grace.as_secs()),
        );

        let watcher = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = pending.cancelled() => {}
                _ = sleep(grace) => watcher.close_if_still_missing(&open, &pending),
            }
        });
    }

    fn close_if_still_missing(&self, pod: &str, pending: &CancellationToken) {
        {
            let mut state = self.state();
            // A cancelled token was already replaced or withdrawn.
            if pending.is_cancelled() {
                return;
            }
            state.pending_close.remove(pod);
            let still_open = state.open_pod.as_deref() == Some(pod);
            let still_missing = state
                .previous
                .as_ref()
                .is_none_or(|snapshot| !snapshot.contains(pod));
            if !still_open || !still_missing {
                return;
            }
            state.open_pod = None;
        }
        info!("closing view of removed pod {pod}");
        self.surface.close_detail_view(pod);
    }

    fn state(&self) -> MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
