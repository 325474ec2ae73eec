use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrayError {
    #[error("kubectl {operation} failed: {cause}")]
    Gateway { operation: String, cause: String },
    #[error("unexpected kubectl {operation} output: {detail}")]
    Parse { operation: String, detail: String },
    #[error("could not switch to '{target}': {detail}")]
    Conflict { target: String, detail: String },
    #[error("port-forward for pod '{pod}' is already running")]
    SessionConflict { pod: String },
}

impl TrayError {
    pub fn gateway(operation: impl Into<String>, cause: impl ToString) -> Self {
        Self::Gateway {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    pub fn parse(operation: impl Into<String>, detail: impl ToString) -> Self {
        Self::Parse {
            operation: operation.into(),
            detail: detail.to_string(),
        }
    }

    pub fn conflict(target: impl Into<String>, detail: impl ToString) -> Self {
        Self::Conflict {
            target: target.into(),
            detail: detail.to_string(),
        }
    }

    /// Short title used for warning notifications.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Gateway { .. } => "kubectl failed",
            Self::Parse { .. } => "Unexpected kubectl output",
            Self::Conflict { .. } => "Switch refused",
            Self::SessionConflict { .. } => "Port-forward running",
        }
    }
}

pub type TrayResult<T> = std::result::Result<T, TrayError>;

#[cfg(test)]
mod tests {
    use super::TrayError;

    #[test]
    fn messages_name_the_failing_operation() {
        let error = TrayError::gateway("get-contexts", "exit status: 1");
        assert_eq!(
            error.to_string(),
            "kubectl get-contexts failed: exit status: 1"
        );

        let error = TrayError::SessionConflict {
            pod: "web-1".to_string(),
        };
        assert_eq!(error.title(), "Port-forward running");
        assert!(error.to_string().contains("web-1"));
    }
}
