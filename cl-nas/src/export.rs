use std::path::Path;

use cl_graph::graph::Graph;
use cl_graph::onnx::proto::ModelProto;
use cl_graph::onnx::result::OnnxResult;
use cl_graph::onnx::save::{graph_to_model, SaveSettings};
use cl_graph::onnx::save_model_to_path;
use cl_graph::optimizer::{optimize_graph, OptimizerSettings};

#[derive(Debug, Copy, Clone)]
pub struct ExportSettings {
    /// Fold every batch norm into the convolution in front of it.
    pub fuse_bn_into_conv: bool,
    /// Write batch-dependent dimensions with this fixed batch size instead of a symbolic one.
    pub batch: Option<usize>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        ExportSettings {
            fuse_bn_into_conv: true,
            batch: None,
        }
    }
}

/// Optimize `graph` and convert it to an onnx model named `name`, with shapes for every intermediate value.
pub fn export_model(graph: &Graph, name: &str, settings: ExportSettings) -> OnnxResult<ModelProto> {
    let optimizer_settings = OptimizerSettings {
        optimize: settings.fuse_bn_into_conv,
        fuse_bn_into_conv: settings.fuse_bn_into_conv,
    };
    let optimized = optimize_graph(graph, optimizer_settings);

    let save_settings = SaveSettings {
        model_name: name.to_owned(),
        graph_name: name.to_owned(),
        batch: settings.batch,
    };
    let model = graph_to_model(&optimized, &save_settings)?;

    let proto = model.graph.as_ref().map_or(0, |g| g.node.len());
    tracing::info!("exported {}: {} nodes, {}", name, proto, optimized.summary());

    Ok(model)
}

pub fn export_model_to_path(
    graph: &Graph,
    name: &str,
    settings: ExportSettings,
    path: impl AsRef<Path>,
) -> OnnxResult<()> {
    let model = export_model(graph, name, settings)?;
    save_model_to_path(&model, path)
}
