use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::onnx::proto::attribute_proto::AttributeType;

pub type OnnxResult<T> = Result<T, OnnxError>;

#[derive(Debug, Copy, Clone)]
pub struct Node<S = String> {
    pub name: S,
    pub op_type: S,
}

#[derive(Debug, Error)]
pub enum OnnxError {
    #[error("io error on {0:?}: {1}")]
    IO(PathBuf, #[source] io::Error),
    #[error("failed to decode model: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("missing protobuf field {0}")]
    MissingProtoField(&'static str),

    #[error("{0:?} has unused inputs {1:?}")]
    LeftoverInputs(Node, Vec<usize>),
    #[error("{0:?} has unused attributes {1:?}")]
    LeftoverAttributes(Node, Vec<String>),

    #[error("{0:?}: invalid arguments, {1}")]
    InvalidOperationArgs(Node, String),
    #[error("{0:?}: input {1} named {2:?} does not exist")]
    InputNodeDoesNotExist(Node, usize, String),
    #[error("{0:?}: missing input {1}, only {2} were provided")]
    MissingInput(Node, usize, usize),
    #[error("{0:?}: input {1} was already used")]
    InputAlreadyUsed(Node, usize),
    #[error("{0:?}: missing attribute {1:?} of type {2:?}, available: {3:?}")]
    MissingAttribute(Node, String, AttributeType, Vec<String>),
    #[error("{0:?}: attribute {1:?} should have type {2:?} but has type {3:?}")]
    UnexpectedAttributeType(Node, String, AttributeType, AttributeType),
    #[error("{0:?}: attribute {1:?} is a bool and should be 0 or 1, got {2}")]
    InvalidAttributeBool(Node, String, i64),
    #[error("{0:?}: invalid auto_pad value {1:?}")]
    InvalidAutoPadValue(Node, String),

    #[error("unsupported operation {0:?}")]
    UnsupportedOperation(Node),
    #[error("{0:?}: expected a float tensor operand at input {1}")]
    ExpectedFloatOperand(Node, usize),
    #[error("{0:?}: expected a constant integer operand, got {1}")]
    ExpectedIntOperand(Node, String),
    #[error("value {0:?} has unsupported type {1}")]
    UnsupportedType(String, String),
    #[error("{0:?}: unsupported shape {1}")]
    UnsupportedShape(Node, String),
    #[error("value {0:?} has unsupported shape {1}")]
    UnsupportedValueShape(String, String),
    #[error("output {0:?} is not a float tensor")]
    UnsupportedNonFloatOutput(String),

    #[error("graph has no inputs")]
    NoInputs,
    #[error("no Transpose node found, cannot remove preprocessing")]
    NoTransposeFound,
}

pub trait ToOnnxLoadResult {
    type T;
    fn to_onnx_result(self, path: impl AsRef<Path>) -> OnnxResult<Self::T>;
}

impl<T> ToOnnxLoadResult for Result<T, io::Error> {
    type T = T;
    fn to_onnx_result(self, path: impl AsRef<Path>) -> OnnxResult<T> {
        self.map_err(|e| OnnxError::IO(path.as_ref().to_owned(), e))
    }
}

pub trait UnwrapProto {
    type T;
    fn unwrap_proto(self, field: &'static str) -> OnnxResult<Self::T>;
}

impl<T> UnwrapProto for Option<T> {
    type T = T;
    fn unwrap_proto(self, field: &'static str) -> OnnxResult<T> {
        self.ok_or(OnnxError::MissingProtoField(field))
    }
}

impl<S: AsRef<str>> Node<S> {
    pub fn to_owned(self) -> Node<String> {
        Node {
            name: self.name.as_ref().to_owned(),
            op_type: self.op_type.as_ref().to_owned(),
        }
    }
}
