use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod as KubePod;
use std::collections::HashMap;

use crate::error::{TrayError, TrayResult};
use crate::model::{ClusterContext, Container, Pod, PodDetails, PollSnapshot};

/// Rows of `kubectl config get-contexts --no-headers`.
///
/// Columns are `CURRENT NAME CLUSTER AUTHINFO NAMESPACE`; the CURRENT column
/// is either `*` or blank, so it only shows up as a field when set.
pub fn parse_contexts(raw: &str) -> Vec<ClusterContext> {
    raw.lines()
        .filter_map(|line| {
            let mut columns = line.split_whitespace().collect::<Vec<_>>();
            if columns.is_empty() {
                return None;
            }
            let in_use = columns[0] == "*";
            if in_use {
                columns.remove(0);
            }
            let name = columns.first()?.to_string();
            let namespace = (columns.len() == 4).then(|| columns[3].to_string());
            Some(ClusterContext {
                name,
                namespace,
                in_use,
            })
        })
        .collect()
}

/// Lines of `kubectl get namespaces -o name`, `namespace/` prefix dropped.
pub fn parse_namespace_names(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.strip_prefix("namespace/").unwrap_or(line).to_string())
        .collect()
}

/// Rows of `kubectl get pods --no-headers`.
pub fn parse_pods(raw: &str) -> TrayResult<Vec<Pod>> {
    let mut pods = Vec::new();
    for line in raw.lines().filter(|line| !line.trim().is_empty()) {
        let columns = line.split_whitespace().collect::<Vec<_>>();
        if columns.len() < 5 {
            return Err(TrayError::parse(
                "get pods",
                format!("expected 5 columns, got {}: '{}'", columns.len(), line.trim()),
            ));
        }
        let last = columns.len() - 1;
        pods.push(Pod {
            name: columns[0].to_string(),
            ready: columns[1].to_string(),
            status: columns[2].to_string(),
            // "3 (2m ago)" spreads over several fields
            restarts: columns[3..last].join(" "),
            age: columns[last].to_string(),
            created_at: None,
            containers: Vec::new(),
        });
    }
    Ok(pods)
}

/// Space-delimited output of the pod name jsonpath query.
pub fn parse_pod_names(raw: &str) -> PollSnapshot {
    PollSnapshot::from_names(
        raw.trim()
            .trim_matches('\'')
            .split_whitespace()
            .map(str::to_string),
    )
}

/// `kubectl get pods <name> -o json`.
pub fn parse_pod_details(raw: &str) -> TrayResult<PodDetails> {
    let pod: KubePod = serde_json::from_str(raw)
        .map_err(|error| TrayError::parse("get pod", format!("invalid pod json: {error}")))?;

    let created_at = pod
        .metadata
        .creation_timestamp
        .as_ref()
        .ok_or_else(|| TrayError::parse("get pod", "missing metadata.creationTimestamp"))
        .and_then(|time| {
            DateTime::<Utc>::from_timestamp(
                time.0.as_second(),
                time.0.subsec_nanosecond().max(0) as u32,
            )
            .ok_or_else(|| TrayError::parse("get pod", "creationTimestamp out of range"))
        })?;

    let readiness = pod
        .status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .map(|status| (status.name.as_str(), status.ready))
                .collect::<HashMap<_, _>>()
        })
        .unwrap_or_default();

    let containers = pod
        .spec
        .as_ref()
        .map(|spec| {
            spec.containers
                .iter()
                .map(|container| Container {
                    name: container.name.clone(),
                    image: container.image.clone().unwrap_or_default(),
                    ready: readiness
                        .get(container.name.as_str())
                        .copied()
                        .unwrap_or(false),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(PodDetails {
        created_at,
        containers,
    })
}
