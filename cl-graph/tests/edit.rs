use cl_graph::graph::{ConvParams, Graph};
use cl_graph::onnx::edit::{
    change_batch_size, infer_shapes, prune_unused_initializers, remove_cnn_preproc, short_name, shorten_names,
};
use cl_graph::onnx::info::format_model_info;
use cl_graph::onnx::load::graph_from_model;
use cl_graph::onnx::proto::attribute_proto::AttributeType;
use cl_graph::onnx::proto::tensor_proto::DataType;
use cl_graph::onnx::proto::tensor_shape_proto::{dimension, Dimension};
use cl_graph::onnx::proto::type_proto::{Tensor, Value as TypeValue};
use cl_graph::onnx::proto::{
    AttributeProto, GraphProto, ModelProto, NodeProto, TensorProto, TensorShapeProto, TypeProto, ValueInfoProto,
};
use cl_graph::onnx::result::OnnxError;
use cl_graph::onnx::save::{graph_to_model, SaveSettings};
use cl_graph::shape;
use cl_graph::shape::Size;

fn dims_of(info: &ValueInfoProto) -> Vec<Option<dimension::Value>> {
    let TypeValue::TensorType(tensor) = info.r#type.as_ref().unwrap().value.as_ref().unwrap();
    tensor.shape.as_ref().unwrap().dim.iter().map(|d| d.value.clone()).collect()
}

fn tensor_info(name: &str, dims: &[i64]) -> ValueInfoProto {
    let dim = dims
        .iter()
        .map(|&d| Dimension {
            value: Some(dimension::Value::DimValue(d)),
            ..Default::default()
        })
        .collect();

    ValueInfoProto {
        name: name.to_owned(),
        r#type: Some(TypeProto {
            value: Some(TypeValue::TensorType(Tensor {
                elem_type: DataType::Float as i32,
                shape: Some(TensorShapeProto { dim }),
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn node(op_type: &str, inputs: &[&str], output: &str) -> NodeProto {
    NodeProto {
        input: inputs.iter().map(|s| s.to_string()).collect(),
        output: vec![output.to_owned()],
        name: output.to_owned(),
        op_type: op_type.to_owned(),
        ..Default::default()
    }
}

/// An image classifier that still contains its NHWC preprocessing.
fn preproc_model() -> ModelProto {
    let mean = TensorProto {
        name: "net/mean".to_owned(),
        dims: vec![3],
        data_type: DataType::Float as i32,
        float_data: vec![0.5; 3],
        ..Default::default()
    };
    let unused = TensorProto {
        name: "net/unused".to_owned(),
        dims: vec![1],
        data_type: DataType::Float as i32,
        float_data: vec![1.0],
        ..Default::default()
    };

    let mut transpose = node("Transpose", &["net/centered"], "net/nchw");
    transpose.attribute.push(AttributeProto {
        name: "perm".to_owned(),
        r#type: AttributeType::Ints as i32,
        ints: vec![0, 3, 1, 2],
        ..Default::default()
    });

    ModelProto {
        graph: Some(GraphProto {
            node: vec![
                node("Sub", &["net/image", "net/mean"], "net/centered"),
                transpose,
                node("Relu", &["net/nchw"], "net/out"),
            ],
            initializer: vec![mean, unused],
            input: vec![tensor_info("net/image", &[1, 32, 32, 3])],
            output: vec![tensor_info("net/out", &[1, 3, 32, 32])],
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[test]
fn short_names() {
    assert_eq!(short_name("model/block1/conv", "model/"), "block1/conv");
    assert_eq!(short_name("a/model/b/model/c", "model/"), "b/model/c");
    assert_eq!(short_name("conv", "model/"), "conv");
    assert_eq!(short_name("conv", ""), "conv");
}

#[test]
fn batch_change_and_infer() {
    let mut graph = Graph::new();
    let x = graph.input(shape![Size::BATCH, 2, 4, 4]);
    let w = graph.constant(shape![3, 2, 3, 3], vec![0.5; 3 * 2 * 3 * 3]);
    let y = graph.conv(x, w, None, ConvParams::same(1));
    let y = graph.relu(y);
    let y = graph.global_avg_pool(y);
    graph.output(y);

    let mut model = graph_to_model(&graph, &SaveSettings::default()).unwrap();
    let input = &model.graph.as_ref().unwrap().input[0];
    assert_eq!(dims_of(input)[0], Some(dimension::Value::DimParam("N".to_owned())));

    change_batch_size(&mut model, 8).unwrap();
    let proto = model.graph.as_ref().unwrap();
    assert!(proto.value_info.is_empty());
    assert_eq!(dims_of(&proto.input[0])[0], Some(dimension::Value::DimValue(8)));
    assert_eq!(dims_of(&proto.output[0])[0], Some(dimension::Value::DimValue(8)));

    infer_shapes(&mut model).unwrap();
    let proto = model.graph.as_ref().unwrap();
    // the conv and the relu, the pooled value is an output
    assert_eq!(proto.value_info.len(), 2);
    for info in &proto.value_info {
        assert_eq!(
            dims_of(info),
            [8, 3, 4, 4].iter().map(|&d| Some(dimension::Value::DimValue(d))).collect::<Vec<_>>()
        );
    }

    let loaded = graph_from_model(&model, None).unwrap();
    assert_eq!(loaded.output_shapes(), vec![shape![8, 3]]);
}

#[test]
fn strip_preprocessing() {
    let mut model = preproc_model();
    remove_cnn_preproc(&mut model).unwrap();

    let proto = model.graph.as_ref().unwrap();
    assert_eq!(proto.node.len(), 1);
    assert_eq!(proto.node[0].op_type, "Relu");
    assert_eq!(proto.node[0].input, vec!["net/image".to_owned()]);
    assert_eq!(
        dims_of(&proto.input[0]),
        [1, 3, 32, 32].iter().map(|&d| Some(dimension::Value::DimValue(d))).collect::<Vec<_>>()
    );

    let pruned = prune_unused_initializers(&mut model).unwrap();
    assert_eq!(pruned, 2);
    assert!(model.graph.as_ref().unwrap().initializer.is_empty());

    let graph = graph_from_model(&model, None).unwrap();
    assert_eq!(graph.output_shapes(), vec![shape![1, 3, 32, 32]]);
}

#[test]
fn strip_preprocessing_requires_transpose() {
    let mut model = preproc_model();
    model.graph.as_mut().unwrap().node.remove(1);

    assert!(matches!(remove_cnn_preproc(&mut model), Err(OnnxError::NoTransposeFound)));
}

#[test]
fn shorten_and_describe() {
    let mut model = preproc_model();
    shorten_names(&mut model, "net/").unwrap();

    let proto = model.graph.as_ref().unwrap();
    assert_eq!(proto.input[0].name, "image");
    assert_eq!(proto.node[0].name, "centered");
    assert_eq!(proto.node[0].input, vec!["image".to_owned(), "mean".to_owned()]);
    assert_eq!(proto.initializer[1].name, "unused");

    let info = format_model_info(&model, "").unwrap();
    assert!(info.contains("Sub (image, mean) {} -> (centered)"));
    assert!(info.contains("Transpose (centered) {perm=[0, 3, 1, 2]} -> (nchw)"));
    assert!(info.contains("mean: float[3]"));
}
