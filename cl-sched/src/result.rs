use thiserror::Error;

use cl_graph::onnx::result::OnnxError;

pub type SchedResult<T> = Result<T, SchedError>;

#[derive(Debug, Error)]
pub enum SchedError {
    #[error(transparent)]
    Onnx(#[from] OnnxError),

    #[error("missing protobuf field {0}")]
    MissingProtoField(&'static str),
    #[error("value {0:?} has no type information")]
    MissingValueInfo(String),
    #[error("value {0:?} has symbolic dimension {1:?}, pass a batch size to fix it")]
    SymbolicDimension(String, String),
    #[error("value {0:?} has an unknown dimension")]
    UnknownDimension(String),
    #[error("value {0:?} has unsupported element type {1}")]
    UnsupportedType(String, i32),

    #[error("node {node:?} uses value {value:?} which is never defined")]
    UndefinedValue { node: String, value: String },
    #[error("value {0:?} is defined more than once")]
    DuplicateDefinition(String),
    #[error("graph output {0:?} is never defined")]
    UndefinedOutput(String),
    #[error("graph contains a cycle")]
    Cycle,
}
