//! Error types for the bootstrap pipeline.

use std::fmt;
use std::path::PathBuf;

/// Library result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a push was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushFailure {
    /// Credentials were rejected.
    Auth,
    /// The remote could not be reached.
    Network,
    /// The remote refused the update.
    Rejected,
}

impl fmt::Display for PushFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth => write!(f, "authentication failed"),
            Self::Network => write!(f, "network failure"),
            Self::Rejected => write!(f, "rejected by remote"),
        }
    }
}

/// Errors raised by the bootstrap pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Downloading release metadata or a manifest failed.
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// A response body could not be interpreted.
    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    /// Filesystem error while writing into the tree.
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Version-control backend error.
    #[error("git {operation} failed: {source}")]
    Git {
        operation: &'static str,
        #[source]
        source: git2::Error,
    },

    /// A computed path resolved outside of the manifest tree.
    #[error("path {0} escapes the manifest tree")]
    PathEscapesTree(PathBuf),

    /// A repository already exists where a new one was requested.
    #[error("repository already exists at {0}")]
    AlreadyExists(PathBuf),

    /// Push failed.
    #[error("push to {remote} failed ({reason}): {message}")]
    Push {
        remote: String,
        reason: PushFailure,
        message: String,
    },

    /// Push did not succeed within its retry budget.
    #[error("push to {remote} failed after {attempts} attempts: {last_error}")]
    PushExhausted {
        remote: String,
        attempts: u32,
        last_error: String,
    },

    /// The health endpoint never answered within its retry budget.
    #[error("{url} not reachable after {attempts} attempts: {last_error}")]
    ReachabilityTimeout {
        url: String,
        attempts: u32,
        last_error: String,
    },

    /// A rendered or synthesized document is not a valid resource.
    #[error("failed to decode resource: {0}")]
    Decode(String),

    /// The resource kind has no entry in the kind table.
    #[error("unknown resource kind {kind} ({api_version})")]
    UnknownKind { kind: String, api_version: String },

    /// The cluster rejected a create call.
    #[error("failed to create {kind} {namespace}/{name}: {source}")]
    Apply {
        kind: String,
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    /// A read against the cluster failed.
    #[error("kubernetes {operation} failed: {source}")]
    Kube {
        operation: String,
        #[source]
        source: kube::Error,
    },

    /// No cluster client is configured (dry-run applier).
    #[error("no cluster client configured")]
    NoCluster,

    /// The requested kubeconfig context does not exist.
    #[error("context {0} not found in kubeconfig")]
    ContextNotFound(String),

    /// Kubeconfig could not be loaded or turned into a client.
    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /// The target pod never reached the Running phase.
    #[error("pod {namespace}/{name} not running after {attempts} attempts (last phase: {phase})")]
    PodNotReady {
        namespace: String,
        name: String,
        attempts: u32,
        phase: String,
    },

    /// The tunnel closed or could not be established.
    #[error("tunnel error: {0}")]
    Tunnel(String),

    /// A synthesized group had nothing to write.
    #[error("no {0} resources to write, synthesize them first")]
    EmptyGroup(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn git(operation: &'static str, source: git2::Error) -> Self {
        Self::Git { operation, source }
    }

    pub(crate) fn parse(what: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            what: what.into(),
            message: message.to_string(),
        }
    }
}
