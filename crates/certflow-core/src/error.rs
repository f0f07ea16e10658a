use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertflowError {
    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Provider errors
    #[error("Provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    #[error("Provider '{0}' already registered")]
    AlreadyRegistered(String),

    #[error("Provider '{0}' not registered")]
    NotRegistered(String),

    // Graph errors
    #[error("Graph integrity error: {0}")]
    GraphIntegrity(String),

    #[error("Guard expression error: {0}")]
    Expression(String),

    // Execution errors
    #[error("Node '{node_name}' ({node_id}) failed: {source}")]
    NodeFailed {
        node_id: String,
        node_name: String,
        #[source]
        source: Box<CertflowError>,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid run transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Internal error: {0}")]
    Internal(String),

    // Storage errors
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CertflowError {
    /// Shorthand for a provider invocation failure.
    pub fn provider(provider: impl Into<String>, message: impl ToString) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    /// Wrap an error with the identity of the node that raised it.
    ///
    /// Errors that already carry node identity are returned unchanged, so the
    /// innermost failing node is the one reported.
    pub fn in_node(self, node_id: &str, node_name: &str) -> Self {
        match self {
            e @ CertflowError::NodeFailed { .. } => e,
            e => CertflowError::NodeFailed {
                node_id: node_id.to_string(),
                node_name: node_name.to_string(),
                source: Box::new(e),
            },
        }
    }

    /// True when this error (or the error wrapped by a node failure) is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            CertflowError::Cancelled => true,
            CertflowError::NodeFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// The id of the node that raised this error, if known.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            CertflowError::NodeFailed { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CertflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_node_keeps_innermost_identity() {
        let err = CertflowError::provider("webhook", "502 Bad Gateway")
            .in_node("deploy-1", "Deploy")
            .in_node("try-1", "Try");
        assert_eq!(err.node_id(), Some("deploy-1"));
        assert!(err.to_string().contains("502 Bad Gateway"));
    }

    #[test]
    fn test_cancellation_seen_through_wrapping() {
        let err = CertflowError::Cancelled.in_node("delay-1", "Wait");
        assert!(err.is_cancelled());
        assert!(!CertflowError::Config("x".into()).is_cancelled());
    }

    #[test]
    fn test_registry_error_display() {
        assert_eq!(
            CertflowError::AlreadyRegistered("webhook".into()).to_string(),
            "Provider 'webhook' already registered"
        );
        assert_eq!(
            CertflowError::NotRegistered("ftp".into()).to_string(),
            "Provider 'ftp' not registered"
        );
    }
}
