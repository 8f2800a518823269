use crate::port::PortType;
use thiserror::Error;

/// A connection request that can never be valid, whatever the topology.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("Multiplier {multiplier} out of range [0, 2] for {src} -> {dest}")]
    InvalidMultiplier {
        src: String,
        dest: String,
        multiplier: f32,
    },

    #[error("Cannot connect {src} -> {dest}: source must be an output and destination an input")]
    FlowMismatch { src: String, dest: String },

    #[error("Cannot connect {src} ({src_type:?}) -> {dest} ({dest_type:?})")]
    TypeMismatch {
        src: String,
        dest: String,
        src_type: PortType,
        dest_type: PortType,
    },
}

/// A saved connection list that cannot be restored.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Malformed connection list: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Saved connection rejected: {0}")]
    Rejected(#[from] ConnectionError),
}

/// Topology errors. The previously published graph stays live.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouteError {
    #[error("Routing would create a cycle: {}", nodes.join(" -> "))]
    Cycle { nodes: Vec<String> },

    #[error("Connecting {src} -> {dest} would create a cycle")]
    ConnectionCycle { src: String, dest: String },

    #[error("Node {node} cannot feed itself")]
    SelfLoop { node: String },

    #[error("No connection {src} -> {dest}")]
    NotConnected { src: String, dest: String },

    #[error("Port is not registered: {0}")]
    DanglingPort(String),

    #[error("Port is already registered: {0}")]
    DuplicatePort(String),

    #[error("Node name already in use: {0}")]
    DuplicateNode(String),

    #[error("Unknown node id {0}")]
    UnknownNode(usize),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

pub type RouteResult<T> = Result<T, RouteError>;

/// Failure of a node's process step. Carries no heap data so it can be
/// produced and reported from the real-time thread.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessFault {
    #[error("Port buffer is shorter than the cycle")]
    BufferTooShort,

    #[error("Port has the wrong buffer kind")]
    WrongBufferKind,

    #[error("Output contains non-finite samples")]
    NonFiniteOutput,

    #[error("Plugin reported failure code {0}")]
    Plugin(i32),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Route(#[from] RouteError),
}
