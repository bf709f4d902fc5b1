use cl_graph::graph::{same_padding, ConvParams, Graph, Operation, PaddingMode, PoolOp, SliceRange};
use cl_graph::shape;
use cl_graph::shape::Size;

#[test]
fn dedup_const() {
    let mut graph = Graph::new();

    let x0 = graph.constant(shape![2], vec![1.0, 2.0]);
    let x1 = graph.constant(shape![2], vec![1.0, 2.0]);
    let x2 = graph.constant(shape![2], vec![1.0, 3.0]);
    assert_eq!(x0, x1);
    assert_ne!(x0, x2);

    let y0 = graph.constant(shape![2], vec![1.0, f32::NAN]);
    let y1 = graph.constant(shape![2], vec![1.0, f32::NAN]);
    assert_eq!(y0, y1);

    assert_ne!(x0, y0);
}

#[test]
fn dedup_weightless_ops() {
    let mut graph = Graph::new();
    let x = graph.input(shape![Size::BATCH, 4, 8, 8]);

    let a = graph.relu(x);
    let b = graph.relu(x);
    assert_eq!(a, b);
    assert_eq!(graph.non_output_uses(x), 1);

    let p0 = graph.pool(x, PoolOp::Avg, (3, 3), (1, 1), PaddingMode::Same);
    let p1 = graph.pool(x, PoolOp::Avg, (3, 3), (1, 1), PaddingMode::Same);
    let p2 = graph.pool(x, PoolOp::Max, (3, 3), (1, 1), PaddingMode::Same);
    assert_eq!(p0, p1);
    assert_ne!(p0, p2);
}

#[test]
fn same_padding_splits_extra_after() {
    assert_eq!(same_padding(7, 3, 2, 1), (1, 1));
    assert_eq!(same_padding(8, 3, 2, 1), (0, 1));
    assert_eq!(same_padding(8, 3, 1, 2), (2, 2));
    assert_eq!(same_padding(8, 1, 2, 1), (0, 0));
    assert_eq!(same_padding(32, 5, 1, 1), (2, 2));
}

#[test]
fn conv_shapes() {
    let mut graph = Graph::new();
    let x = graph.input(shape![Size::BATCH, 4, 7, 7]);
    let w = graph.constant(shape![8, 4, 3, 3], vec![0.1; 8 * 4 * 3 * 3]);

    let same = graph.conv(x, w, None, ConvParams::same(2));
    assert_eq!(graph[same].shape, shape![Size::BATCH, 8, 4, 4]);

    let valid = graph.conv(x, w, None, ConvParams::valid(2));
    assert_eq!(graph[valid].shape, shape![Size::BATCH, 8, 3, 3]);

    let dilated = graph.conv(x, w, None, ConvParams::same(1).with_dilation(2));
    assert_eq!(graph[dilated].shape, shape![Size::BATCH, 8, 7, 7]);

    let dw = graph.constant(shape![4, 1, 5, 5], vec![0.1; 4 * 5 * 5]);
    let depthwise = graph.conv(x, dw, None, ConvParams::same(1).with_groups(4));
    assert_eq!(graph[depthwise].shape, shape![Size::BATCH, 4, 7, 7]);
    match &graph[depthwise].operation {
        Operation::Conv { details, .. } => {
            assert!(details.is_depthwise());
            assert_eq!(details.kernel_shape(), [4, 1, 5, 5]);
        }
        other => panic!("expected conv, got {:?}", other),
    }
}

#[test]
#[should_panic]
fn conv_channel_mismatch() {
    let mut graph = Graph::new();
    let x = graph.input(shape![1, 4, 8, 8]);
    let w = graph.constant(shape![8, 3, 3, 3], vec![0.0; 8 * 3 * 3 * 3]);
    let _ = graph.conv(x, w, None, ConvParams::same(1));
}

#[test]
fn pool_slice_pad_concat() {
    let mut graph = Graph::new();
    let x = graph.input(shape![Size::BATCH, 6, 9, 9]);

    let pooled = graph.pool(x, PoolOp::Max, (3, 3), (2, 2), PaddingMode::Same);
    assert_eq!(graph[pooled].shape, shape![Size::BATCH, 6, 5, 5]);

    let padded = graph.pad(x, vec![(0, 0), (0, 0), (0, 1), (0, 1)]);
    assert_eq!(graph[padded].shape, shape![Size::BATCH, 6, 10, 10]);

    let cropped = graph.slice(padded, 2, SliceRange::simple(1, 10));
    let cropped = graph.slice(cropped, 3, SliceRange::simple(1, 10));
    assert_eq!(graph[cropped].shape, shape![Size::BATCH, 6, 9, 9]);

    let strided = graph.slice(x, 1, SliceRange::new(0, 6, 2));
    assert_eq!(graph[strided].shape, shape![Size::BATCH, 3, 9, 9]);

    let cat = graph.concat(vec![x, cropped, strided], 1);
    assert_eq!(graph[cat].shape, shape![Size::BATCH, 15, 9, 9]);

    // trivial operations return the input itself
    assert_eq!(graph.slice(x, 1, SliceRange::simple(0, 6)), x);
    assert_eq!(graph.pad(x, vec![(0, 0); 4]), x);
    assert_eq!(graph.concat(vec![x], 1), x);
}

#[test]
fn dense_head() {
    let mut graph = Graph::new();
    let x = graph.input(shape![Size::BATCH, 16, 4, 4]);

    let pooled = graph.global_avg_pool(x);
    assert_eq!(graph[pooled].shape, shape![Size::BATCH, 16]);

    let w = graph.constant(shape![16, 10], vec![0.5; 160]);
    let b = graph.constant(shape![10], vec![1.0; 10]);
    let y = graph.linear(pooled, w, Some(b));
    assert_eq!(graph[y].shape, shape![Size::BATCH, 10]);

    let flat = graph.flatten(x, 1);
    assert_eq!(graph[flat].shape, shape![Size::BATCH, 256]);
}

#[test]
fn binary_skips_identity_constants() {
    let mut graph = Graph::new();
    let x = graph.input(shape![2, 3]);

    let zero = graph.scalar(0.0);
    let one = graph.scalar(1.0);
    assert_eq!(graph.add(x, zero), x);
    assert_eq!(graph.mul(x, one), x);

    let two = graph.scalar(2.0);
    let y = graph.mul(x, two);
    assert_ne!(y, x);
    assert_eq!(graph[y].shape, shape![2, 3]);
}

#[test]
fn summary_counts() {
    let mut graph = Graph::new();
    let x = graph.input(shape![1, 2, 4, 4]);
    let w = graph.constant(shape![2, 2, 1, 1], vec![1.0; 4]);
    let y = graph.conv(x, w, None, ConvParams::same(1));
    let y = graph.relu(y);
    graph.output(y);

    let summary = graph.summary();
    assert_eq!(summary.value_count, 4);
    assert_eq!(summary.param_count, 4);
    assert_eq!(summary.op_counts["Conv"], 1);
    assert_eq!(summary.op_counts["Unary"], 1);
    assert!(summary.to_string().contains("4 parameters"));
}

#[test]
fn size_arithmetic() {
    let b2 = Size::new(1, 2);
    assert_eq!(b2 + Size::BATCH, Some(Size::new(1, 3)));
    assert_eq!(b2 + Size::fixed(3), None);
    assert_eq!(Size::ZERO + b2, Some(b2));

    assert_eq!(b2 * Size::BATCH, Size::new(2, 2));
    assert_eq!(Size::new(2, 6) / b2, Some(Size::new(1, 3)));
    assert_eq!(Size::fixed(6) / Size::BATCH, None);
    assert_eq!(Size::fixed(6) / Size::fixed(4), None);

    assert_eq!(Size::new(3, 0), Size::ZERO);
    assert_eq!(b2.eval(5), 10);
    assert_eq!(Size::new(2, 1).to_string(), "B^2");
    assert_eq!(b2.to_string(), "2B");
}

#[test]
fn shape_manipulation() {
    let shape = shape![Size::BATCH, 4, 8, 8];
    assert_eq!(shape.size(), Size::new(1, 256));
    assert!(shape.has_batch());
    assert_eq!(shape.as_fixed(), None);
    assert_eq!(shape.eval(2).size(), 512);
    assert_eq!(shape.channels(), 4);
    assert_eq!(shape.spatial(), (8, 8));

    let (head, tail) = shape.split(2);
    assert_eq!(head, shape![Size::BATCH, 4]);
    assert_eq!(head.concat(&tail), shape);

    assert_eq!(shape.replace(1, shape![2, 2]), shape![Size::BATCH, 2, 2, 8, 8]);
    assert_eq!(shape.insert(0, Size::ONE), shape![1, Size::BATCH, 4, 8, 8]);

    let sum: Option<Size> = shape.dims[1..].iter().copied().sum();
    assert_eq!(sum, Some(Size::fixed(20)));
    let sum: Option<Size> = shape.dims.iter().copied().sum();
    assert_eq!(sum, None);
}
