use sqlgraph_storage::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// API-level failures: graph mutation, configuration, persistence and
/// scheduler preconditions. Failures of individual nodes during a run are
/// [`NodeError`]s stored on the node instead.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Kernel not found: {0}")]
    KernelNotFound(String),

    #[error("Kernel already registered: {0}")]
    DuplicateKernel(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Node already exists: {0}")]
    DuplicateNode(String),

    #[error("Invalid node name '{name}': {reason}")]
    InvalidNodeName { name: String, reason: String },

    #[error("Node({node}) has no input slot {slot} (kernel declares {declared})")]
    InputOutOfRange {
        node: String,
        slot: usize,
        declared: usize,
    },

    #[error("Node({node}) has no output {output} (kernel declares {declared})")]
    OutputOutOfRange {
        node: String,
        output: usize,
        declared: usize,
    },

    #[error("Wiring cycle detected: {}", .cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{field} = {value} is out of range [{min}, {max}]: {hint}")]
    ConfigRange {
        field: String,
        value: String,
        min: String,
        max: String,
        hint: String,
    },

    #[error("Unsupported graph document version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    pub fn range_with_hint(
        field: impl Into<String>,
        value: impl ToString,
        min: impl ToString,
        max: impl ToString,
        hint: impl Into<String>,
    ) -> Self {
        Self::ConfigRange {
            field: field.into(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
            hint: hint.into(),
        }
    }

    pub fn invalid_name(name: &str, reason: &str) -> Self {
        Self::InvalidNodeName {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Failure of a kernel body
#[derive(Error, Debug)]
pub enum KernelError {
    #[error("parameter '{0}' is empty")]
    MissingParameter(&'static str),

    #[error("no inputs")]
    NoInputs,

    #[error("no upstream databases to attach")]
    NoDatabases,

    #[error("kernel({0}) not found")]
    UnknownKernel(String),

    #[error("Attach() failed: {0}")]
    Attach(#[source] StorageError),

    #[error("Write() failed: {0}")]
    Statement(#[source] StorageError),

    /// The result was already materialized; only the cleanup failed
    #[error("Detach() failed after result was created: {0}")]
    Detach(#[source] StorageError),

    #[error("kernel panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type KernelResult<T> = std::result::Result<T, KernelError>;

/// Node-local error kind (wiring, upstream, kernel, cancellation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum NodeErrorKind {
    /// A referenced input node does not exist or the slot is not connected
    Wiring,
    /// Derived: some input carries an error
    Upstream,
    /// The node's own kernel failed
    Kernel,
    /// The run was interrupted while this node was executing
    Cancelled,
}

impl NodeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeErrorKind::Wiring => "wiring",
            NodeErrorKind::Upstream => "upstream",
            NodeErrorKind::Kernel => "kernel",
            NodeErrorKind::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "wiring" => Ok(NodeErrorKind::Wiring),
            "upstream" => Ok(NodeErrorKind::Upstream),
            "kernel" => Ok(NodeErrorKind::Kernel),
            "cancelled" => Ok(NodeErrorKind::Cancelled),
            _ => Err(EngineError::config(format!(
                "Invalid node error kind: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for NodeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error held as node state after a generation; slots are 1-based in messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("input {} {reason}", .slot + 1)]
    Wiring { slot: usize, reason: String },

    #[error("incoming error from input {} ({source_node})", .slot + 1)]
    Upstream { slot: usize, source_node: String },

    #[error("{message}")]
    Kernel { message: String },

    #[error("Interrupted")]
    Cancelled,
}

impl NodeError {
    pub fn kind(&self) -> NodeErrorKind {
        match self {
            NodeError::Wiring { .. } => NodeErrorKind::Wiring,
            NodeError::Upstream { .. } => NodeErrorKind::Upstream,
            NodeError::Kernel { .. } => NodeErrorKind::Kernel,
            NodeError::Cancelled => NodeErrorKind::Cancelled,
        }
    }

    pub fn not_connected(slot: usize) -> Self {
        NodeError::Wiring {
            slot,
            reason: "is not connected".to_string(),
        }
    }

    pub fn missing_node(slot: usize, name: &str) -> Self {
        NodeError::Wiring {
            slot,
            reason: format!("references missing node '{}'", name),
        }
    }
}

impl From<KernelError> for NodeError {
    fn from(err: KernelError) -> Self {
        NodeError::Kernel {
            message: err.to_string(),
        }
    }
}
