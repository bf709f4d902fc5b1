use rand::rngs::SmallRng;
use rand::SeedableRng;

use cl_graph::graph::{ConvParams, Graph};
use cl_graph::onnx::save::{graph_to_model, SaveSettings};
use cl_graph::shape;
use cl_graph::shape::Size;
use cl_sched::graph::{OpGraph, OpId};
use cl_sched::life::{compute_lifetime, estimate_peak, overlap_input, Lifetime};
use cl_sched::order::{random_sample, reverse_post_order};

fn op_graph(graph: &Graph) -> OpGraph {
    let settings = SaveSettings {
        batch: Some(1),
        ..Default::default()
    };
    OpGraph::from_model(&graph_to_model(graph, &settings).unwrap()).unwrap()
}

/// `concat(conv(relu(x) + sigmoid(x)), relu(x))`, values of 1024 bytes except the 2048 byte output.
fn diamond() -> OpGraph {
    let mut graph = Graph::new();
    let x = graph.input(shape![Size::BATCH, 4, 8, 8]);
    let a = graph.relu(x);
    let b = graph.sigmoid(x);
    let c = graph.add(a, b);
    let w = graph.constant(shape![4, 4, 1, 1], vec![0.5; 16]);
    let d = graph.conv(c, w, None, ConvParams::same(1));
    let e = graph.concat(vec![d, a], 1);
    graph.output(e);
    op_graph(&graph)
}

fn order_by_types(graph: &OpGraph, types: &[&str]) -> Vec<OpId> {
    types
        .iter()
        .map(|&ty| graph.ops().find(|&op| graph[op].op_type == ty).unwrap())
        .collect()
}

fn lifetime_of(stat: &cl_sched::life::LifetimeStat, graph: &OpGraph, op_type: &str) -> Lifetime {
    let op = graph.ops().find(|&op| graph[op].op_type == op_type).unwrap();
    let value = graph[op].outputs[0];
    *stat.values.iter().find(|life| life.value == value).unwrap()
}

#[test]
fn overlap_candidates() {
    let graph = diamond();
    let [relu, sigmoid, add, conv, concat] =
        <[OpId; 5]>::try_from(order_by_types(&graph, &["Relu", "Sigmoid", "Add", "Conv", "Concat"])).unwrap();

    assert_eq!(overlap_input(&graph, relu), Some(0));
    assert_eq!(overlap_input(&graph, sigmoid), Some(0));
    assert_eq!(overlap_input(&graph, add), Some(0));
    assert_eq!(overlap_input(&graph, conv), None);
    assert_eq!(overlap_input(&graph, concat), None);
}

#[test]
fn diamond_lifetimes() {
    let graph = diamond();
    let order = order_by_types(&graph, &["Relu", "Sigmoid", "Add", "Conv", "Concat"]);
    let stat = compute_lifetime(&graph, &order);

    assert_eq!(stat.begin, Lifetime::INPUT);
    assert_eq!(stat.end, 5);
    assert_eq!(stat.values.len(), 6);

    let input = stat.values.iter().find(|life| life.value == graph.inputs()[0]).unwrap();
    // the sigmoid takes the last use of the input and writes over it
    assert_eq!((input.gen, input.kill), (-1, 1));

    let relu = lifetime_of(&stat, &graph, "Relu");
    assert_eq!((relu.gen, relu.kill), (0, 5));
    // the add could only overwrite the relu output, which is still needed afterwards
    let sigmoid = lifetime_of(&stat, &graph, "Sigmoid");
    assert_eq!((sigmoid.gen, sigmoid.kill), (1, 3));
    let add = lifetime_of(&stat, &graph, "Add");
    assert_eq!((add.gen, add.kill), (2, 4));
    let concat = lifetime_of(&stat, &graph, "Concat");
    assert_eq!((concat.gen, concat.kill, concat.size), (4, 5, 2048));

    assert_eq!(stat.histogram(), vec![1024, 2048, 2048, 3072, 3072, 4096]);
    assert_eq!(stat.peak(), 4096);
    assert_eq!(stat.peak_times(), vec![4]);

    let mut alive = stat.alive_at(4);
    alive.sort();
    let mut expected = order_by_types(&graph, &["Relu", "Conv", "Concat"])
        .into_iter()
        .map(|op| graph[op].outputs[0])
        .collect::<Vec<_>>();
    expected.sort();
    assert_eq!(alive, expected);

    assert_eq!(estimate_peak(&graph, &order), 4096);
}

#[test]
fn overlapping_chain() {
    let mut graph = Graph::new();
    let x = graph.input(shape![Size::BATCH, 4, 8, 8]);
    let y = graph.relu(x);
    let y = graph.sigmoid(y);
    graph.output(y);
    let graph = op_graph(&graph);

    let order = reverse_post_order(&graph);
    let stat = compute_lifetime(&graph, &order);

    // every op writes over its input, so only a single value is ever alive
    assert_eq!(stat.histogram(), vec![1024, 1024, 1024]);
    assert_eq!(estimate_peak(&graph, &order), 1024);
}

#[test]
fn unused_input_dies_immediately() {
    let mut graph = Graph::new();
    let x = graph.input(shape![Size::BATCH, 4, 8, 8]);
    let _ = graph.input(shape![Size::BATCH, 8, 8, 8]);
    let w = graph.constant(shape![4, 4, 1, 1], vec![0.5; 16]);
    let y = graph.conv(x, w, None, ConvParams::same(1));
    graph.output(y);
    let graph = op_graph(&graph);

    let unused = graph.inputs().iter().copied().find(|&v| graph.size(v) == 2048).unwrap();
    assert_eq!(graph.use_count(unused), 0);

    let order = reverse_post_order(&graph);
    let stat = compute_lifetime(&graph, &order);
    let life = stat.values.iter().find(|life| life.value == unused).unwrap();
    assert_eq!((life.gen, life.kill), (-1, 0));

    // both inputs before the conv, then the input and the result
    assert_eq!(stat.histogram(), vec![3072, 2048]);
    assert_eq!(stat.peak(), 3072);
    assert_eq!(estimate_peak(&graph, &order), 3072);
}

#[test]
fn estimate_matches_lifetimes() {
    let graph = diamond();
    let mut rng = SmallRng::seed_from_u64(0);

    for _ in 0..16 {
        let order = random_sample(&graph, &mut rng);
        let stat = compute_lifetime(&graph, &order);
        assert_eq!(estimate_peak(&graph, &order), stat.peak(), "{:?}", order);

        for life in &stat.values {
            assert!(life.gen < life.kill, "{:?}", life);
        }
    }
}
