use std::path::Path;

use prost::Message;

use crate::graph::Graph;
use crate::onnx::load::{graph_from_model, load_model_proto};
use crate::onnx::proto::ModelProto;
use crate::onnx::result::{OnnxResult, ToOnnxLoadResult};
use crate::onnx::save::{graph_to_model, SaveSettings};

#[allow(warnings)]
pub mod proto;

pub mod edit;
pub mod info;
mod inputs;
pub mod load;
pub mod result;
pub mod save;
mod typed_value;

/// Load an onnx file as a [Graph]. If `batch` is given, symbolic dimensions are fixed to it.
pub fn load_graph_from_onnx_path(path: impl AsRef<Path>, batch: Option<usize>) -> OnnxResult<Graph> {
    let model = load_model_from_path(path)?;
    graph_from_model(&model, batch)
}

pub fn load_graph_from_onnx_bytes(buffer: &[u8], batch: Option<usize>) -> OnnxResult<Graph> {
    let model = load_model_proto(buffer)?;
    graph_from_model(&model, batch)
}

pub fn load_model_from_path(path: impl AsRef<Path>) -> OnnxResult<ModelProto> {
    let path = path.as_ref();
    let buf = std::fs::read(path).to_onnx_result(path)?;
    load_model_proto(&buf)
}

pub fn save_model_to_path(model: &ModelProto, path: impl AsRef<Path>) -> OnnxResult<()> {
    let path = path.as_ref();
    std::fs::write(path, model.encode_to_vec()).to_onnx_result(path)
}

pub fn save_graph_to_onnx_path(graph: &Graph, settings: &SaveSettings, path: impl AsRef<Path>) -> OnnxResult<()> {
    let model = graph_to_model(graph, settings)?;
    save_model_to_path(&model, path)
}
