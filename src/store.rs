use std::sync::{PoisonError, RwLock};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::TrayResult;
use crate::gateway::ClusterGateway;
use crate::model::{ClusterContext, Namespace, Pod};

/// Last-known cluster state.
///
/// Each collection sits behind its own `RwLock` and is only ever swapped or
/// edited inside a single write, so readers never see a half-built list.
/// Writers additionally go through [`StoreWriter`], which holds one async
/// gate for the whole fetch-and-swap; a context switch and a background pod
/// refresh therefore never interleave.
pub struct StateStore {
    gateway: ClusterGateway,
    writer: Mutex<()>,
    contexts: RwLock<Vec<ClusterContext>>,
    namespaces: RwLock<Vec<Namespace>>,
    pods: RwLock<Vec<Pod>>,
}

impl StateStore {
    pub fn new(gateway: ClusterGateway) -> Self {
        Self {
            gateway,
            writer: Mutex::new(()),
            contexts: RwLock::new(Vec::new()),
            namespaces: RwLock::new(Vec::new()),
            pods: RwLock::new(Vec::new()),
        }
    }

    pub fn gateway(&self) -> &ClusterGateway {
        &self.gateway
    }

    /// Waits for exclusive write access.
    pub async fn writer(&self) -> StoreWriter<'_> {
        StoreWriter {
            store: self,
            _gate: self.writer.lock().await,
        }
    }

    pub async fn refresh_contexts(&self) -> TrayResult<()> {
        self.writer().await.reload_contexts().await
    }

    pub async fn refresh_namespaces(&self) -> TrayResult<()> {
        self.writer().await.reload_namespaces().await
    }

    pub async fn refresh_pods(&self) -> TrayResult<()> {
        self.writer().await.reload_pods().await
    }

    /// Contexts, then namespaces of the resulting context, then pods. Every
    /// step runs even if an earlier one failed; the first error is returned.
    pub async fn refresh_all(&self) -> TrayResult<()> {
        let writer = self.writer().await;
        let contexts = writer.reload_contexts().await;
        let namespaces = writer.reload_namespaces().await;
        let pods = writer.reload_pods().await;
        contexts.and(namespaces).and(pods)
    }

    pub async fn describe_pod(&self, name: &str) -> TrayResult<Pod> {
        self.writer().await.describe_pod(name).await
    }

    pub fn contexts(&self) -> Vec<ClusterContext> {
        read(&self.contexts)
    }

    pub fn namespaces(&self) -> Vec<Namespace> {
        read(&self.namespaces)
    }

    pub fn pods(&self) -> Vec<Pod> {
        read(&self.pods)
    }

    pub fn pod(&self, name: &str) -> Option<Pod> {
        self.pods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|pod| pod.name == name)
            .cloned()
    }

    pub fn current_context(&self) -> Option<ClusterContext> {
        self.contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|context| context.in_use)
            .cloned()
    }

    pub fn current_namespace(&self) -> Option<Namespace> {
        self.namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|namespace| namespace.in_use)
            .cloned()
    }
}

/// Exclusive write access to a [`StateStore`].
pub struct StoreWriter<'a> {
    store: &'a StateStore,
    _gate: MutexGuard<'a, ()>,
}

impl StoreWriter<'_> {
    pub fn store(&self) -> &StateStore {
        self.store
    }

    pub async fn reload_contexts(&self) -> TrayResult<()> {
        let gateway = &self.store.gateway;
        let listed = match gateway.list_contexts().await {
            Ok(listed) => listed,
            Err(error) => {
                replace(&self.store.contexts, Vec::new());
                return Err(error);
            }
        };
        let current = gateway.current_context().await.ok();
        let contexts = mark_current_context(listed, current.as_deref());
        debug!("loaded {} contexts", contexts.len());
        replace(&self.store.contexts, contexts);
        Ok(())
    }

    pub async fn reload_namespaces(&self) -> TrayResult<()> {
        let current = self
            .store
            .current_context()
            .map(|context| context.effective_namespace().to_string());
        let names = match self.store.gateway.list_namespaces().await {
            Ok(names) => names,
            Err(error) => {
                replace(&self.store.namespaces, Vec::new());
                return Err(error);
            }
        };

        let mut namespaces = names
            .into_iter()
            .map(|name| Namespace {
                in_use: current.as_deref() == Some(name.as_str()),
                name,
            })
            .collect::<Vec<_>>();
        // The configured namespace may not be listable (RBAC) or may not exist yet.
        if let Some(current) = current
            && !namespaces.iter().any(|namespace| namespace.name == current)
        {
            namespaces.push(Namespace {
                name: current,
                in_use: true,
            });
        }
        debug!("loaded {} namespaces", namespaces.len());
        replace(&self.store.namespaces, namespaces);
        Ok(())
    }

    pub async fn reload_pods(&self) -> TrayResult<()> {
        let mut pods = match self.store.gateway.list_pods().await {
            Ok(pods) => pods,
            Err(error) => {
                replace(&self.store.pods, Vec::new());
                return Err(error);
            }
        };

        let previous = self.store.pods();
        for pod in &mut pods {
            if let Some(known) = previous
                .iter()
                .find(|known| known.name == pod.name && known.has_details())
            {
                pod.created_at = known.created_at;
                pod.containers = known.containers.clone();
            }
        }
        debug!("loaded {} pods", pods.len());
        replace(&self.store.pods, pods);
        Ok(())
    }

    pub async fn describe_pod(&self, name: &str) -> TrayResult<Pod> {
        let details = self.store.gateway.describe_pod(name).await?;
        let mut pods = self
            .store
            .pods
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match pods.iter_mut().find(|pod| pod.name == name) {
            Some(pod) => {
                pod.apply_details(details);
                Ok(pod.clone())
            }
            None => {
                let mut pod = Pod {
                    name: name.to_string(),
                    ..Pod::default()
                };
                pod.apply_details(details);
                Ok(pod)
            }
        }
    }

    /// Flags `name` as the only in-use context. Returns false when unknown.
    pub fn mark_context_in_use(&self, name: &str) -> bool {
        let mut contexts = self
            .store
            .contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !contexts.iter().any(|context| context.name == name) {
            return false;
        }
        for context in contexts.iter_mut() {
            context.in_use = context.name == name;
        }
        true
    }

    /// Flags `name` as the only in-use namespace. Returns false when unknown.
    pub fn mark_namespace_in_use(&self, name: &str) -> bool {
        let mut namespaces = self
            .store
            .namespaces
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !namespaces.iter().any(|namespace| namespace.name == name) {
            return false;
        }
        for namespace in namespaces.iter_mut() {
            namespace.in_use = namespace.name == name;
        }
        true
    }
}

/// kubectl's `current-context` wins over the `*` column; the column is the
/// fallback when that query failed or named something not listed.
fn mark_current_context(
    mut contexts: Vec<ClusterContext>,
    current: Option<&str>,
) -> Vec<ClusterContext> {
    if let Some(current) = current
        && contexts.iter().any(|context| context.name == current)
    {
        for context in &mut contexts {
            context.in_use = context.name == current;
        }
        return contexts;
    }

    let mut seen = false;
    for context in &mut contexts {
        context.in_use = context.in_use && !seen;
        seen |= context.in_use;
    }
    contexts
}

fn read<T: Clone>(lock: &RwLock<Vec<T>>) -> Vec<T> {
    lock.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn replace<T>(lock: &RwLock<Vec<T>>, values: Vec<T>) {
    *lock.write().unwrap_or_else(PoisonError::into_inner) = values;
}
