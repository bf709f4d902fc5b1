use std::collections::HashMap;

use cl_graph::onnx::load::graph_from_model;
use cl_graph::onnx::proto::ModelProto;
use cl_graph::shape;
use cl_graph::shape::Size;
use cl_nas::arch::ArchKind;
use cl_nas::cell::{NasNetPreset, NasNetSettings};
use cl_nas::export::{export_model, ExportSettings};

fn count_nodes(model: &ModelProto, op_type: &str) -> usize {
    let graph = model.graph.as_ref().unwrap();
    graph.node.iter().filter(|n| n.op_type == op_type).count()
}

fn darts_builder(batch: Size) -> cl_nas::cell::NasNetBuilder {
    let preset = NasNetPreset::Darts;
    let settings = NasNetSettings {
        num_stacked: 1,
        init_filters: 4,
        batch,
        ..preset.settings(ArchKind::Cifar)
    };
    preset.builder(ArchKind::Cifar, settings)
}

#[test]
fn export_fuses_conv_batchnorms() {
    let builder = darts_builder(Size::fixed(1));
    let graph = builder.build();
    let name = builder.model_name();

    let unfused = export_model(
        &graph,
        &name,
        ExportSettings {
            fuse_bn_into_conv: false,
            ..Default::default()
        },
    )
    .unwrap();
    let fused = export_model(&graph, &name, ExportSettings::default()).unwrap();

    assert_eq!(fused.doc_string, "darts-cifar");
    assert_eq!(fused.graph.as_ref().unwrap().name, "darts-cifar");
    assert_eq!(count_nodes(&unfused, "Conv"), count_nodes(&fused, "Conv"));
    assert!(count_nodes(&fused, "BatchNormalization") < count_nodes(&unfused, "BatchNormalization"));

    // the remaining batchnorms follow the concat of a factorized reduction
    let proto = fused.graph.as_ref().unwrap();
    let producers: HashMap<&str, &str> = proto
        .node
        .iter()
        .flat_map(|n| n.output.iter().map(move |o| (o.as_str(), n.op_type.as_str())))
        .collect();
    for node in proto.node.iter().filter(|n| n.op_type == "BatchNormalization") {
        assert_eq!(producers[node.input[0].as_str()], "Concat", "{:?}", node);
    }

    let loaded = graph_from_model(&fused, None).unwrap();
    assert_eq!(loaded.output_shapes(), vec![shape![1, 100]]);
    assert_eq!(loaded.summary().op_counts["Conv"], graph.summary().op_counts["Conv"]);
}

#[test]
fn export_fixed_batch() {
    let builder = darts_builder(Size::BATCH);
    let graph = builder.build();

    let symbolic = export_model(&graph, "darts", ExportSettings::default()).unwrap();
    let loaded = graph_from_model(&symbolic, None).unwrap();
    assert_eq!(loaded.output_shapes(), vec![shape![Size::BATCH, 100]]);

    let settings = ExportSettings {
        batch: Some(4),
        ..Default::default()
    };
    let fixed = export_model(&graph, "darts", settings).unwrap();
    let loaded = graph_from_model(&fixed, None).unwrap();
    assert_eq!(loaded.input_shapes(), vec![shape![4, 3, 32, 32]]);
    assert_eq!(loaded.output_shapes(), vec![shape![4, 100]]);
}
