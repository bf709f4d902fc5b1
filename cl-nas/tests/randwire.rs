use rand::rngs::SmallRng;
use rand::SeedableRng;

use cl_graph::graph::Graph;
use cl_graph::shape;
use cl_nas::randwire::{random_graph, RandWireBuilder, RandWireSettings, Vertex};

fn edge_count(vertices: &[Vertex]) -> usize {
    vertices.iter().map(|v| v.succs.len()).sum()
}

fn assert_dag(vertices: &[Vertex]) {
    for (i, v) in vertices.iter().enumerate() {
        assert!(v.preds.iter().all(|&p| p < i), "{}: {:?}", i, v);
        assert!(v.succs.iter().all(|&s| s > i), "{}: {:?}", i, v);
        assert!(v.preds.windows(2).all(|w| w[0] < w[1]));
        assert!(v.succs.windows(2).all(|w| w[0] < w[1]));
        for &s in &v.succs {
            assert!(vertices[s].preds.contains(&i));
        }
    }
}

#[test]
fn ring_lattice_without_rewiring() {
    let mut rng = SmallRng::seed_from_u64(0);
    let vertices = random_graph(8, 4, 0.0, &mut rng);

    assert_dag(&vertices);
    assert_eq!(edge_count(&vertices), 16);
    assert_eq!(vertices[0].preds, Vec::<usize>::new());
    assert_eq!(vertices[0].succs, vec![1, 2, 6, 7]);
    assert_eq!(vertices[7].preds, vec![0, 1, 5, 6]);
    assert_eq!(vertices[7].succs, Vec::<usize>::new());
    assert_eq!(vertices[3].preds, vec![1, 2]);
}

#[test]
fn rewiring_keeps_edge_count() {
    let mut rng = SmallRng::seed_from_u64(5);
    let vertices = random_graph(32, 4, 0.75, &mut rng);
    assert_dag(&vertices);
    assert_eq!(edge_count(&vertices), 64);

    let lattice = random_graph(32, 4, 0.0, &mut rng);
    assert_ne!(vertices, lattice);

    let mut rng = SmallRng::seed_from_u64(5);
    assert_eq!(random_graph(32, 4, 0.75, &mut rng), vertices);
}

#[test]
fn small_network() {
    let settings = RandWireSettings {
        channels: 8,
        nodes: 6,
        k: 2,
        p: 0.5,
        seed: 3,
        ..Default::default()
    };
    let graph = RandWireBuilder::new(settings).build();

    let cell = |i: usize| {
        let id = format!("cell{}", i);
        let value = graph.values().find(|&v| graph[v].debug_id == id).unwrap();
        graph[value].shape.clone()
    };

    assert_eq!(graph.input_shapes(), vec![shape![1, 3, 224, 224]]);
    assert_eq!(cell(0), shape![1, 8, 28, 28]);
    assert_eq!(cell(1), shape![1, 16, 14, 14]);
    assert_eq!(cell(2), shape![1, 32, 7, 7]);
    assert_eq!(graph.output_shapes(), vec![shape![1, 1000]]);
}

#[test]
fn aggregation_uses_sigmoid_weights() {
    let settings = RandWireSettings {
        channels: 4,
        nodes: 5,
        k: 4,
        p: 0.0,
        ..Default::default()
    };
    let graph: Graph = RandWireBuilder::new(settings).build();

    // every lattice node except the first has several inputs
    let counts = graph.summary().op_counts;
    assert!(counts["Unary"] > 0);
    assert!(counts["Slice"] >= 2);
}
