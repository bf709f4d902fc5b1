use rand::rngs::SmallRng;
use rand::SeedableRng;

use cl_graph::graph::{ConvParams, Graph};
use cl_graph::onnx::save::{graph_to_model, SaveSettings};
use cl_graph::shape;
use cl_graph::shape::Size;
use cl_nas::arch::ArchKind;
use cl_nas::cell::{NasNetPreset, NasNetSettings};
use cl_nas::export::{export_model, ExportSettings};
use cl_sched::graph::OpGraph;
use cl_sched::order::{is_valid_order, random_sample, reverse_post_order};

fn op_graph(graph: &Graph) -> OpGraph {
    let settings = SaveSettings {
        batch: Some(1),
        ..Default::default()
    };
    OpGraph::from_model(&graph_to_model(graph, &settings).unwrap()).unwrap()
}

/// `x -> relu -> sigmoid -> tanh`
fn chain() -> OpGraph {
    let mut graph = Graph::new();
    let x = graph.input(shape![Size::BATCH, 4, 8, 8]);
    let y = graph.relu(x);
    let y = graph.sigmoid(y);
    let y = graph.unary(cl_graph::graph::UnaryOp::Tanh, y);
    graph.output(y);
    op_graph(&graph)
}

/// Two branches of different depth joined by an add.
fn branches() -> OpGraph {
    let mut graph = Graph::new();
    let x = graph.input(shape![Size::BATCH, 4, 8, 8]);
    let w = graph.constant(shape![4, 4, 1, 1], vec![0.5; 16]);

    let left = graph.conv(x, w, None, ConvParams::same(1));
    let right = graph.relu(x);
    let right = graph.conv(right, w, None, ConvParams::same(1));
    let right = graph.sigmoid(right);

    let y = graph.add(left, right);
    graph.output(y);
    op_graph(&graph)
}

fn small_darts() -> OpGraph {
    let preset = NasNetPreset::Darts;
    let settings = NasNetSettings {
        num_stacked: 1,
        init_filters: 4,
        batch: Size::fixed(1),
        ..preset.settings(ArchKind::Cifar)
    };
    let builder = preset.builder(ArchKind::Cifar, settings);
    let model = export_model(&builder.build(), &builder.model_name(), ExportSettings::default()).unwrap();
    OpGraph::from_model(&model).unwrap()
}

#[test]
fn chain_has_single_order() {
    let graph = chain();
    let order = reverse_post_order(&graph);

    let types = order.iter().map(|&op| graph[op].op_type.as_str()).collect::<Vec<_>>();
    assert_eq!(types, vec!["Relu", "Sigmoid", "Tanh"]);
    assert!(is_valid_order(&graph, &order));

    let mut reversed = order.clone();
    reversed.reverse();
    assert!(!is_valid_order(&graph, &reversed));
}

#[test]
fn rpo_finishes_operands_in_order() {
    let graph = branches();
    let order = reverse_post_order(&graph);

    let types = order.iter().map(|&op| graph[op].op_type.as_str()).collect::<Vec<_>>();
    assert_eq!(types, vec!["Conv", "Relu", "Conv", "Sigmoid", "Add"]);
}

#[test]
fn invalid_orders() {
    let graph = branches();
    let order = reverse_post_order(&graph);
    assert!(is_valid_order(&graph, &order));

    assert!(!is_valid_order(&graph, &order[1..]));

    let mut duplicate = order.clone();
    duplicate[4] = duplicate[0];
    assert!(!is_valid_order(&graph, &duplicate));
}

#[test]
fn random_samples_are_valid() {
    let graph = branches();
    let mut rng = SmallRng::seed_from_u64(0);

    for _ in 0..32 {
        let order = random_sample(&graph, &mut rng);
        assert!(is_valid_order(&graph, &order), "{:?}", order);
    }
}

#[test]
fn darts_orders() {
    let graph = small_darts();
    assert!(is_valid_order(&graph, &reverse_post_order(&graph)));

    let mut rng = SmallRng::seed_from_u64(4);
    for _ in 0..4 {
        assert!(is_valid_order(&graph, &random_sample(&graph, &mut rng)));
    }
}
