use prost::Message;

use cl_graph::graph::{ConvParams, Graph, Operation, PaddingMode, PoolOp, SliceRange};
use cl_graph::onnx::load::graph_from_model;
use cl_graph::onnx::load_graph_from_onnx_bytes;
use cl_graph::onnx::proto::attribute_proto::AttributeType;
use cl_graph::onnx::proto::tensor_proto::DataType;
use cl_graph::onnx::proto::tensor_shape_proto::{dimension, Dimension};
use cl_graph::onnx::proto::type_proto::{Tensor, Value as TypeValue};
use cl_graph::onnx::proto::{
    AttributeProto, GraphProto, ModelProto, NodeProto, TensorProto, TensorShapeProto, TypeProto, ValueInfoProto,
};
use cl_graph::onnx::result::OnnxError;
use cl_graph::onnx::save::{graph_to_model, SaveSettings, OPSET_VERSION, PRODUCER_NAME};
use cl_graph::shape;
use cl_graph::shape::Size;

fn small_cnn() -> Graph {
    let mut graph = Graph::new();
    let x = graph.input(shape![Size::BATCH, 3, 8, 8]);

    let w = graph.constant(shape![4, 3, 3, 3], (0..108).map(|i| i as f32 / 100.0).collect());
    let y = graph.conv(x, w, None, ConvParams::same(1));

    let ones = graph.constant(shape![4], vec![1.0; 4]);
    let zeros = graph.constant(shape![4], vec![0.0; 4]);
    let y = graph.batch_norm(y, ones, zeros, zeros, ones, 1e-3);
    let y = graph.relu(y);
    let y = graph.pool(y, PoolOp::Max, (3, 3), (2, 2), PaddingMode::Same);

    let y = graph.global_avg_pool(y);
    let dense_w = graph.constant(shape![4, 10], vec![0.25; 40]);
    let dense_b = graph.constant(shape![10], vec![0.5; 10]);
    let y = graph.linear(y, dense_w, Some(dense_b));
    graph.output(y);

    graph
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

fn node(op_type: &str, inputs: &[&str], output: &str, attribute: Vec<AttributeProto>) -> NodeProto {
    NodeProto {
        input: inputs.iter().map(|s| s.to_string()).collect(),
        output: vec![output.to_owned()],
        name: output.to_owned(),
        op_type: op_type.to_owned(),
        attribute,
        ..Default::default()
    }
}

fn model(input: ValueInfoProto, nodes: Vec<NodeProto>, initializer: Vec<TensorProto>, output: &str) -> ModelProto {
    ModelProto {
        graph: Some(GraphProto {
            node: nodes,
            initializer,
            input: vec![input],
            output: vec![ValueInfoProto {
                name: output.to_owned(),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[test]
fn save_then_load_keeps_structure() {
    let graph = small_cnn();
    let model = graph_to_model(&graph, &SaveSettings::default()).unwrap();

    assert_eq!(model.producer_name, PRODUCER_NAME);
    assert_eq!(model.opset_import[0].version, OPSET_VERSION);

    let proto = model.graph.as_ref().unwrap();
    assert_eq!(proto.input.len(), 1);
    assert_eq!(proto.output.len(), 1);
    assert_eq!(proto.output[0].name, "output");
    // conv filter, ones, zeros, dense weight and dense bias
    assert_eq!(proto.initializer.len(), 5);

    let bytes = model.encode_to_vec();
    let loaded = load_graph_from_onnx_bytes(&bytes, None).unwrap();

    assert_eq!(loaded.input_shapes(), vec![shape![Size::BATCH, 3, 8, 8]]);
    assert_eq!(loaded.output_shapes(), vec![shape![Size::BATCH, 10]]);
    assert_eq!(loaded.summary().op_counts, graph.summary().op_counts);
    assert_eq!(loaded.summary().param_count, graph.summary().param_count);
}

#[test]
fn save_with_fixed_batch() {
    let graph = small_cnn();
    let settings = SaveSettings {
        batch: Some(2),
        ..Default::default()
    };
    let model = graph_to_model(&graph, &settings).unwrap();

    let input_type = model.graph.as_ref().unwrap().input[0].r#type.as_ref().unwrap();
    let TypeValue::TensorType(tensor) = input_type.value.as_ref().unwrap();
    let first = &tensor.shape.as_ref().unwrap().dim[0];
    assert_eq!(first.value, Some(dimension::Value::DimValue(2)));

    let loaded = graph_from_model(&model, None).unwrap();
    assert_eq!(loaded.output_shapes(), vec![shape![2, 10]]);
}

#[test]
fn save_then_load_views_and_slices() {
    let mut graph = Graph::new();
    let x = graph.input(shape![Size::BATCH, 4, 6, 6]);
    let padded = graph.pad(x, vec![(0, 0), (0, 0), (0, 1), (0, 1)]);
    let cropped = graph.slice(padded, 2, SliceRange::simple(1, 7));
    let cropped = graph.slice(cropped, 3, SliceRange::simple(1, 7));
    let cat = graph.concat(vec![x, cropped], 1);
    let flat = graph.flatten(cat, 1);
    graph.output(flat);

    let model = graph_to_model(&graph, &SaveSettings::default()).unwrap();
    let loaded = graph_from_model(&model, None).unwrap();

    assert_eq!(loaded.output_shapes(), vec![shape![Size::BATCH, 8 * 6 * 6]]);
    let counts = loaded.summary().op_counts;
    assert_eq!(counts["Pad"], 1);
    assert_eq!(counts["Slice"], 2);
    assert_eq!(counts["Concat"], 1);
    assert_eq!(counts["View"], 1);
}

#[test]
fn input_as_output_gets_identity() {
    let mut graph = Graph::new();
    let x = graph.input(shape![1, 2]);
    graph.output(x);
    graph.output(x);

    let model = graph_to_model(&graph, &SaveSettings::default()).unwrap();
    let proto = model.graph.as_ref().unwrap();
    assert_eq!(proto.node.len(), 2);
    assert!(proto.node.iter().all(|n| n.op_type == "Identity"));

    let loaded = graph_from_model(&model, None).unwrap();
    assert_eq!(loaded.outputs(), &[loaded.inputs()[0], loaded.inputs()[0]]);
}

#[test]
fn load_clip_as_relu_and_gemm_trans_b() {
    let weight = TensorProto {
        name: "w".to_owned(),
        dims: vec![2, 3],
        data_type: DataType::Float as i32,
        float_data: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        ..Default::default()
    };
    let attr = |name: &str, f: f32| AttributeProto {
        name: name.to_owned(),
        r#type: AttributeType::Float as i32,
        f,
        ..Default::default()
    };
    let trans_b = AttributeProto {
        name: "transB".to_owned(),
        r#type: AttributeType::Int as i32,
        i: 1,
        ..Default::default()
    };

    let nodes = vec![
        node("Clip", &["x"], "clipped", vec![attr("min", 0.0), attr("max", f32::INFINITY)]),
        node("Gemm", &["clipped", "w"], "y", vec![trans_b]),
    ];
    let model = model(tensor_info("x", &[5, 3]), nodes, vec![weight], "y");

    let graph = graph_from_model(&model, None).unwrap();
    assert_eq!(graph.output_shapes(), vec![shape![5, 2]]);

    let y = graph.outputs()[0];
    let Operation::MatMul { left, right } = graph[y].operation else {
        panic!("expected matmul, got {:?}", graph[y].operation);
    };
    assert!(matches!(graph[left].operation, Operation::Unary { .. }));
    assert_eq!(graph.as_const(right).unwrap(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
}

#[test]
fn load_errors() {
    let unsupported = model(
        tensor_info("x", &[1, 3]),
        vec![node("Foo", &["x"], "y", vec![])],
        vec![],
        "y",
    );
    match graph_from_model(&unsupported, None) {
        Err(OnnxError::UnsupportedOperation(node)) => assert_eq!(node.op_type, "Foo"),
        other => panic!("unexpected result {:?}", other),
    }

    let missing = model(
        tensor_info("x", &[1, 3]),
        vec![node("Relu", &["z"], "y", vec![])],
        vec![],
        "y",
    );
    assert!(matches!(
        graph_from_model(&missing, None),
        Err(OnnxError::InputNodeDoesNotExist(_, 0, _))
    ));

    let leftover_attr = AttributeProto {
        name: "alpha".to_owned(),
        r#type: AttributeType::Float as i32,
        f: 0.1,
        ..Default::default()
    };
    let leftover = model(
        tensor_info("x", &[1, 3]),
        vec![node("Relu", &["x"], "y", vec![leftover_attr])],
        vec![],
        "y",
    );
    assert!(matches!(
        graph_from_model(&leftover, None),
        Err(OnnxError::LeftoverAttributes(_, _))
    ));

    assert!(matches!(
        load_graph_from_onnx_bytes(&[0xff, 0xff, 0xff], None),
        Err(OnnxError::Decode(_))
    ));
}

#[test]
fn load_rejects_invalid_operands() {
    let int_attr = |name: &str, i: i64| AttributeProto {
        name: name.to_owned(),
        r#type: AttributeType::Int as i32,
        i,
        ..Default::default()
    };
    let assert_invalid = |model: &ModelProto, op_type: &str| match graph_from_model(model, None) {
        Err(OnnxError::InvalidOperationArgs(node, _)) => assert_eq!(node.op_type, op_type),
        other => panic!("expected invalid {} arguments, got {:?}", op_type, other),
    };

    let flatten = |axis: i64| {
        model(
            tensor_info("x", &[1, 3, 4, 4]),
            vec![node("Flatten", &["x"], "y", vec![int_attr("axis", axis)])],
            vec![],
            "y",
        )
    };
    assert_invalid(&flatten(7), "Flatten");
    assert_invalid(&flatten(-5), "Flatten");
    assert_eq!(graph_from_model(&flatten(4), None).unwrap().output_shapes(), vec![shape![48, 1]]);
    assert_eq!(graph_from_model(&flatten(-1), None).unwrap().output_shapes(), vec![shape![12, 4]]);

    let bias = TensorProto {
        name: "b".to_owned(),
        dims: vec![5],
        data_type: DataType::Float as i32,
        float_data: vec![0.0; 5],
        ..Default::default()
    };
    let add = model(
        tensor_info("x", &[1, 3, 4, 4]),
        vec![node("Add", &["x", "b"], "y", vec![])],
        vec![bias],
        "y",
    );
    assert_invalid(&add, "Add");

    let concat = model(
        tensor_info("x", &[1, 3, 4, 4]),
        vec![node("Concat", &["x", "x"], "y", vec![int_attr("axis", 4)])],
        vec![],
        "y",
    );
    assert_invalid(&concat, "Concat");

    let duplicate_axes = AttributeProto {
        name: "axes".to_owned(),
        r#type: AttributeType::Ints as i32,
        ints: vec![2, -2],
        ..Default::default()
    };
    let reduce = model(
        tensor_info("x", &[1, 3, 4, 4]),
        vec![node("ReduceMean", &["x"], "y", vec![duplicate_axes])],
        vec![],
        "y",
    );
    assert_invalid(&reduce, "ReduceMean");
}
