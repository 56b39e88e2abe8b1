//! Error types for helmfleet-kube

use thiserror::Error;

/// Result type for helmfleet-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Classification of API server failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    NotFound,
    Conflict,
    Forbidden,
    Other,
}

impl ApiErrorKind {
    /// Classify an HTTP status code returned by the API server
    pub fn from_code(code: u16) -> Self {
        match code {
            404 => Self::NotFound,
            409 => Self::Conflict,
            403 => Self::Forbidden,
            _ => Self::Other,
        }
    }
}

/// Errors that can occur while talking to helm or the cluster
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// kubeconfig could not produce a client for the context
    #[error("cannot load kubeconfig context '{context}': {message}")]
    Kubeconfig { context: String, message: String },

    /// External command exited with a non-zero status (-1 when killed by a signal)
    #[error("`{command}` failed (exit code {code}): {stderr}")]
    Process {
        command: String,
        code: i32,
        stderr: String,
    },

    /// External command could not be started at all
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Install kept failing until the retry budget ran out
    #[error("release '{name}' failed after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        name: String,
        attempts: u32,
        #[source]
        last: Box<KubeError>,
    },

    /// Values could not be rendered for a release
    #[error(transparent)]
    Config(#[from] helmfleet_core::ConfigError),

    /// Template or configuration loading failed
    #[error(transparent)]
    Core(#[from] helmfleet_core::CoreError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Classify this error; anything that is not an API response is `Other`
    pub fn kind(&self) -> ApiErrorKind {
        match self {
            KubeError::Api(kube::Error::Api(resp)) => ApiErrorKind::from_code(resp.code),
            _ => ApiErrorKind::Other,
        }
    }

    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        self.kind() == ApiErrorKind::NotFound
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        self.kind() == ApiErrorKind::Conflict
    }

    pub fn is_forbidden(&self) -> bool {
        self.kind() == ApiErrorKind::Forbidden
    }

    /// helm reported that the release does not exist
    pub fn is_release_not_found(&self) -> bool {
        matches!(
            self,
            KubeError::Process { stderr, .. } if stderr.to_lowercase().contains("not found")
        )
    }

    /// Whether retrying the same command could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, KubeError::Process { .. })
    }
}
