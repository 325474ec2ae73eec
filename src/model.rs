use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ClusterContext {
    pub name: String,
    pub namespace: Option<String>,
    pub in_use: bool,
}

impl ClusterContext {
    /// Namespace kubectl resolves for this context when none is configured.
    pub fn effective_namespace(&self) -> &str {
        self.namespace
            .as_deref()
            .filter(|namespace| !namespace.is_empty())
            .unwrap_or("default")
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Namespace {
    pub name: String,
    pub in_use: bool,
}

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Container {
    pub name: String,
    pub image: String,
    pub ready: bool,
}

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Pod {
    pub name: String,
    pub ready: String,
    pub status: String,
    pub restarts: String,
    pub age: String,
    pub created_at: Option<DateTime<Utc>>,
    pub containers: Vec<Container>,
}

impl Pod {
    pub fn apply_details(&mut self, details: PodDetails) {
        self.created_at = Some(details.created_at);
        self.containers = details.containers;
    }

    pub fn has_details(&self) -> bool {
        self.created_at.is_some()
    }

    /// Age from the creation timestamp when known, else the listing column.
    pub fn age_label(&self, now: DateTime<Utc>) -> String {
        match self.created_at {
            Some(created_at) => {
                format_elapsed_seconds((now - created_at).num_seconds().max(0))
            }
            None => self.age.clone(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} Ready: {} Restarts: {} Age: {}",
            self.name, self.ready, self.restarts, self.age
        )
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PodDetails {
    pub created_at: DateTime<Utc>,
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Default)]
pub struct ForwardPorts {
    pub source: String,
    pub target: String,
}

impl ForwardPorts {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.source.trim().is_empty() && !self.target.trim().is_empty()
    }

    pub fn mapping(&self) -> String {
        format!("{}:{}", self.source.trim(), self.target.trim())
    }
}

impl Display for ForwardPorts {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mapping())
    }
}

/// Order-insensitive set of pod names from one poll.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct PollSnapshot {
    names: BTreeSet<String>,
}

impl PollSnapshot {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Some polled name is missing from the known pods.
    pub fn grown_from(&self, known: &[Pod]) -> bool {
        self.names
            .iter()
            .any(|name| !known.iter().any(|pod| &pod.name == name))
    }

    /// Some known pod is missing from the poll.
    pub fn shrunk_from(&self, known: &[Pod]) -> bool {
        known.iter().any(|pod| !self.names.contains(&pod.name))
    }
}

pub fn format_elapsed_seconds(seconds: i64) -> String {
    if seconds >= 86_400 {
        return format!("{}d", seconds / 86_400);
    }

    if seconds >= 3_600 {
        return format!("{}h", seconds / 3_600);
    }

    if seconds >= 60 {
        return format!("{}m", seconds / 60);
    }

    format!("{seconds}s")
}
