use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("missing required parameter `{role}` (variable `{name}`) for {op}")]
    MissingParameter {
        op: String,
        role: String,
        name: String,
    },

    #[error("operator {op} has no `{slot}` input")]
    MissingInput { op: String, slot: String },

    #[error("operator {op} has no `{slot}` output")]
    MissingOutput { op: String, slot: String },

    #[error("operator {op} is missing required attribute `{name}`")]
    MissingAttribute { op: String, name: String },

    #[error("operator {op} has invalid attribute `{name}`: {reason}")]
    InvalidAttribute {
        op: String,
        name: String,
        reason: String,
    },

    #[error("failed to stage `{name}` from {place} to host: {reason}")]
    TransferFailed {
        name: String,
        place: String,
        reason: String,
    },

    #[error("shape mismatch for `{name}`: {reason}")]
    ShapeMismatch { name: String, reason: String },

    #[error("graph build failed: {reason}")]
    GraphBuildFailed { reason: String },

    #[error("tensor `{name}` is not bound in the network")]
    UnknownTensor { name: String },

    #[error("no converter registered for operator type `{op_type}`")]
    UnsupportedOperation { op_type: String },

    #[error("failed to lower {op} (output `{output}`): {source}")]
    OperatorFailed {
        op: String,
        output: String,
        #[source]
        source: Box<GraphError>,
    },

    #[error("invalid engine configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse model `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize `{path}`: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to export `{path}`: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("runtime {kind} tensor `{name}` is missing")]
    RuntimeTensorMissing { kind: String, name: String },

    #[error("runtime {kind} tensor `{name}` is not a network {kind}")]
    RuntimeTensorUnexpected { kind: String, name: String },

    #[error(
        "runtime {kind} tensor `{name}` has rank {actual_rank}, expected {expected_rank}"
    )]
    RuntimeTensorRankMismatch {
        kind: String,
        name: String,
        expected_rank: usize,
        actual_rank: usize,
    },

    #[error(
        "runtime {kind} tensor `{name}` axis {axis} has extent {actual}, expected {expected}"
    )]
    RuntimeStaticDimensionMismatch {
        kind: String,
        name: String,
        axis: usize,
        expected: u32,
        actual: usize,
    },

    #[error("runtime {kind} tensor `{name}` has {actual} elements, shape requires {expected}")]
    RuntimeTensorDataLengthMismatch {
        kind: String,
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("runtime tensor `{name}` shape {shape:?} overflows")]
    RuntimeTensorShapeOverflow { name: String, shape: Vec<usize> },

    #[error(
        "runtime {kind} tensor `{name}` axis {axis} (`{dim_name}`) is {actual}, above max size {max_size}"
    )]
    RuntimeDynamicDimensionExceeded {
        kind: String,
        name: String,
        axis: usize,
        dim_name: String,
        max_size: u32,
        actual: usize,
    },

    #[error("dynamic dimension `{dim_name}` is bound to {expected}, got {actual}")]
    RuntimeDynamicDimensionNameMismatch {
        dim_name: String,
        expected: usize,
        actual: usize,
    },

    #[error("runtime execution failed: {reason}")]
    RuntimeFailed { reason: String },
}

impl GraphError {
    pub fn export(path: PathBuf, source: std::io::Error) -> Self {
        GraphError::Export { path, source }
    }

    pub fn build(reason: impl Into<String>) -> Self {
        GraphError::GraphBuildFailed {
            reason: reason.into(),
        }
    }

    /// Attach the identity of the operator being lowered.
    pub fn with_operator(self, op: &str, output: &str) -> Self {
        GraphError::OperatorFailed {
            op: op.to_string(),
            output: output.to_string(),
            source: Box::new(self),
        }
    }
}
