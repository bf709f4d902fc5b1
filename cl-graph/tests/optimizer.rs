use cl_graph::graph::{ConvParams, Graph, Operation};
use cl_graph::optimizer::{optimize_graph, OptimizerSettings};
use cl_graph::shape;
use cl_graph::shape::Size;

fn conv_bn(graph: &mut Graph) -> (cl_graph::graph::Value, cl_graph::graph::Value) {
    let x = graph.input(shape![Size::BATCH, 1, 4, 4]);
    let w = graph.constant(shape![1, 1, 1, 1], vec![2.0]);
    let conv = graph.conv(x, w, None, ConvParams::same(1));

    let scale = graph.constant(shape![1], vec![3.0]);
    let bias = graph.constant(shape![1], vec![1.0]);
    let mean = graph.constant(shape![1], vec![0.5]);
    let variance = graph.constant(shape![1], vec![3.0]);
    let bn = graph.batch_norm(conv, scale, bias, mean, variance, 1.0);

    (conv, bn)
}

#[test]
fn fuse_bn_into_conv() {
    let mut graph = Graph::new();
    let (_, bn) = conv_bn(&mut graph);
    let y = graph.relu(bn);
    graph.output(y);

    let optimized = optimize_graph(&graph, OptimizerSettings::default());
    assert_eq!(optimized.output_shapes(), graph.output_shapes());
    assert!(!optimized.summary().op_counts.contains_key("BatchNorm"));

    let out = optimized.outputs()[0];
    let &Operation::Unary { input: conv, .. } = &optimized[out].operation else {
        panic!("expected relu, got {:?}", optimized[out].operation);
    };
    let &Operation::Conv { filter, bias, .. } = &optimized[conv].operation else {
        panic!("expected conv, got {:?}", optimized[conv].operation);
    };

    // factor = 3 / sqrt(3 + 1) = 1.5
    assert_eq!(optimized.as_const(filter).unwrap(), &[3.0]);
    assert_eq!(optimized.as_const(bias.unwrap()).unwrap(), &[0.25]);
}

#[test]
fn shared_conv_is_not_fused() {
    let mut graph = Graph::new();
    let (conv, bn) = conv_bn(&mut graph);
    graph.output(bn);
    graph.output(conv);

    let optimized = optimize_graph(&graph, OptimizerSettings::default());
    assert_eq!(optimized.summary().op_counts["BatchNorm"], 1);
    assert_eq!(optimized.len(), graph.len());
}

#[test]
fn disabled_optimizer_copies() {
    let mut graph = Graph::new();
    let (_, bn) = conv_bn(&mut graph);
    graph.output(bn);

    let settings = OptimizerSettings {
        optimize: false,
        ..Default::default()
    };
    let copied = optimize_graph(&graph, settings);
    assert_eq!(copied.summary(), graph.summary());
}
