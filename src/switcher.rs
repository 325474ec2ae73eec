use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{TrayError, TrayResult};
use crate::executor::CommandOutput;
use crate::store::StateStore;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SwitchKind {
    Context,
    Namespace,
}

impl SwitchKind {
    fn label(self) -> &'static str {
        match self {
            Self::Context => "use-context",
            Self::Namespace => "set-context --namespace",
        }
    }

    /// kubectl's own confirmation phrasing. Tied to kubectl's output format.
    fn confirms(self, text: &str) -> bool {
        match self {
            Self::Context => text.starts_with("Switched to context"),
            Self::Namespace => text.starts_with("Context") && text.ends_with("modified."),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SwitchVerdict {
    Confirmed,
    /// kubectl answered with its `error...` phrasing.
    Rejected(String),
    /// No recognised phrase and a failed exit.
    Failed(String),
}

/// The only place that interprets the text of a config write.
pub fn classify_switch_output(kind: SwitchKind, output: &CommandOutput) -> SwitchVerdict {
    let text = output.combined();
    if !kind.confirms(&text) && text.starts_with("error") {
        return SwitchVerdict::Rejected(text);
    }
    if !output.success {
        return SwitchVerdict::Failed(output.failure_reason());
    }
    SwitchVerdict::Confirmed
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SwitchOutcome {
    Applied,
    AlreadyActive,
}

/// Runs context and namespace switches one at a time against the store.
pub struct MutationSerializer {
    store: Arc<StateStore>,
}

impl MutationSerializer {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    pub async fn switch_context(&self, name: &str) -> TrayResult<SwitchOutcome> {
        let writer = self.store.writer().await;
        let Some(target) = writer
            .store()
            .contexts()
            .into_iter()
            .find(|context| context.name == name)
        else {
            return Err(self.reported(TrayError::conflict(name, "unknown context")));
        };
        if target.in_use {
            return Ok(SwitchOutcome::AlreadyActive);
        }

        let output = self.store.gateway().use_context(name).await?;
        self.confirm(SwitchKind::Context, name, &output)?;
        writer.mark_context_in_use(name);
        info!("switched context to {name}");

        // Namespaces are per context.
        if let Err(error) = writer.reload_namespaces().await {
            warn!("namespace reload after switching to {name} failed: {error}");
        }
        Ok(SwitchOutcome::Applied)
    }

    pub async fn switch_namespace(&self, name: &str) -> TrayResult<SwitchOutcome> {
        let writer = self.store.writer().await;
        let Some(target) = writer
            .store()
            .namespaces()
            .into_iter()
            .find(|namespace| namespace.name == name)
        else {
            return Err(self.reported(TrayError::conflict(name, "unknown namespace")));
        };
        if target.in_use {
            return Ok(SwitchOutcome::AlreadyActive);
        }

        let output = self.store.gateway().set_namespace(name).await?;
        self.confirm(SwitchKind::Namespace, name, &output)?;
        writer.mark_namespace_in_use(name);
        info!("switched namespace to {name}");

        // The context listing carries the namespace column.
        if let Err(error) = writer.reload_contexts().await {
            warn!("context reload after switching namespace to {name} failed: {error}");
        }
        Ok(SwitchOutcome::Applied)
    }

    fn confirm(&self, kind: SwitchKind, name: &str, output: &CommandOutput) -> TrayResult<()> {
        match classify_switch_output(kind, output) {
            SwitchVerdict::Confirmed => Ok(()),
            SwitchVerdict::Rejected(text) => Err(self.reported(TrayError::conflict(name, text))),
            SwitchVerdict::Failed(reason) => {
                Err(self.reported(TrayError::gateway(kind.label(), reason)))
            }
        }
    }

    fn reported(&self, error: TrayError) -> TrayError {
        self.store.gateway().report(&error);
        error
    }
}
