use thiserror::Error;

/// Top-level error type for the neurolis morphology kernel.
#[derive(Debug, Error)]
pub enum NeurolisError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Operation(#[from] OperationError),
}

/// Errors related to geometric computations on nodes and compartments.
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("parameter {parameter} = {value} is out of range [{min}, {max}]")]
    ParameterOutOfRange {
        parameter: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("degenerate geometry: {0}")]
    Degenerate(String),

    #[error("unsupported geometry: {0}")]
    Unsupported(String),

    #[error("zero-length vector")]
    ZeroVector,
}

/// Errors related to the node/segment/branch graph.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("loop detected: {0}")]
    Loop(String),

    #[error("{0} segment(s) are not connected to the soma")]
    Disconnected(usize),

    #[error("element is not reachable from the network: {0}")]
    Unreachable(String),

    #[error("invalid topology: {0}")]
    InvalidTopology(String),
}

/// Errors related to morphology operations.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("operation failed: {0}")]
    Failed(String),
}

/// Convenience type alias for results using [`NeurolisError`].
pub type Result<T, E = NeurolisError> = std::result::Result<T, E>;
