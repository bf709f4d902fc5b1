use cl_graph::graph::{Graph, Operation, Value};
use cl_graph::shape;
use cl_graph::shape::{Shape, Size};
use cl_nas::arch::{ArchKind, Architecture, CellKind, Cifar, ImageNet};
use cl_nas::cell::{factorized_reduce, fit, NasNetPreset, NasNetSettings, Variant};
use cl_nas::init::GlorotUniform;
use cl_nas::layers::Layers;
use cl_nas::ops::CellOp;

fn value_by_id(graph: &Graph, id: &str) -> Value {
    graph
        .values()
        .find(|&v| graph[v].debug_id == id)
        .unwrap_or_else(|| panic!("no value named {:?}", id))
}

fn cell_shapes(graph: &Graph, count: usize) -> Vec<Shape> {
    (0..count)
        .map(|i| graph[value_by_id(graph, &format!("cell{}", i))].shape.clone())
        .collect()
}

fn small_settings(preset: NasNetPreset, arch: ArchKind, init_filters: usize) -> NasNetSettings {
    NasNetSettings {
        num_stacked: 1,
        init_filters,
        ..preset.settings(arch)
    }
}

#[test]
fn cell_order() {
    use CellKind::{Normal as N, Reduction as R};

    assert_eq!(Cifar::default().cells(2), vec![N, N, R, N, N, R, N, N]);
    assert_eq!(ImageNet.cells(1), vec![R, R, N, R, N, R, N]);
    assert_eq!(Cifar { num_classes: 10 }.num_classes(), 10);
}

#[test]
fn ops_keep_filters_and_stride() {
    let mut net = Layers::new(GlorotUniform::new(0));
    let x = net.graph.input(shape![1, 8, 16, 16]);

    for op in CellOp::ALL {
        for stride in [1, 2] {
            let y = op.apply(&mut net, x, 12, stride);
            assert_eq!(
                net.graph[y].shape,
                shape![1, 12, 16 / stride, 16 / stride],
                "{} with stride {}",
                op,
                stride
            );
        }
    }
}

#[test]
fn fit_shapes() {
    let mut net = Layers::new(GlorotUniform::new(0));
    let large = net.graph.input(shape![Size::BATCH, 8, 16, 16]);
    let small = net.graph.input(shape![Size::BATCH, 12, 8, 8]);

    assert_eq!(fit(&mut net, None, small, 12), small);

    let squeezed = fit(&mut net, Some(small), small, 6);
    assert_eq!(net.graph[squeezed].shape, shape![Size::BATCH, 6, 8, 8]);

    let reduced = fit(&mut net, Some(large), small, 11);
    assert_eq!(net.graph[reduced].shape, shape![Size::BATCH, 11, 8, 8]);
    assert!(matches!(net.graph[reduced].operation, Operation::BatchNorm { .. }));

    let odd = net.graph.input(shape![1, 4, 111, 111]);
    let odd_reduced = factorized_reduce(&mut net, odd, 10);
    assert_eq!(net.graph[odd_reduced].shape, shape![1, 10, 56, 56]);
}

#[test]
fn darts_cifar() {
    let preset = NasNetPreset::Darts;
    let builder = preset.builder(ArchKind::Cifar, small_settings(preset, ArchKind::Cifar, 8));
    assert_eq!(builder.model_name(), "darts-cifar");

    let graph = builder.build();
    assert_eq!(graph.input_shapes(), vec![shape![1, 3, 32, 32]]);
    assert_eq!(graph.output_shapes(), vec![shape![1, 100]]);

    // four concatenated states, filters double before every reduction
    assert_eq!(
        cell_shapes(&graph, 5),
        vec![
            shape![1, 32, 32, 32],
            shape![1, 64, 16, 16],
            shape![1, 64, 16, 16],
            shape![1, 128, 8, 8],
            shape![1, 128, 8, 8],
        ]
    );
    assert_eq!(graph[value_by_id(&graph, "stem")].shape, shape![1, 32, 32, 32]);
}

#[test]
fn amoebanet_cifar_dynamic_batch() {
    let preset = NasNetPreset::AmoebaNet;
    let settings = NasNetSettings {
        batch: Size::BATCH,
        ..small_settings(preset, ArchKind::Cifar, 6)
    };
    let graph = preset.builder(ArchKind::Cifar, settings).build();

    assert_eq!(graph.output_shapes(), vec![shape![Size::BATCH, 100]]);
    assert_eq!(
        cell_shapes(&graph, 5),
        vec![
            shape![Size::BATCH, 18, 32, 32],
            shape![Size::BATCH, 36, 16, 16],
            shape![Size::BATCH, 36, 16, 16],
            shape![Size::BATCH, 72, 8, 8],
            shape![Size::BATCH, 72, 8, 8],
        ]
    );
}

#[test]
fn nasnet_a_imagenet() {
    let preset = NasNetPreset::NasNetA;
    let settings = small_settings(preset, ArchKind::ImageNet, 4);
    assert_eq!(settings.variant, Variant::NasNet);

    let builder = preset.builder(ArchKind::ImageNet, settings);
    assert_eq!(builder.model_name(), "nasnet_a-imagenet");
    let graph = builder.build();

    // valid stem, filters double after every reduction
    assert_eq!(graph[value_by_id(&graph, "stem")].shape, shape![1, 32, 111, 111]);
    assert_eq!(
        cell_shapes(&graph, 7),
        vec![
            shape![1, 16, 56, 56],
            shape![1, 32, 28, 28],
            shape![1, 96, 28, 28],
            shape![1, 64, 14, 14],
            shape![1, 192, 14, 14],
            shape![1, 128, 7, 7],
            shape![1, 384, 7, 7],
        ]
    );
    assert_eq!(graph.output_shapes(), vec![shape![1, 1000]]);
}

#[test]
fn nasnet_imagenet_same_stem() {
    let preset = NasNetPreset::NasNet;
    let graph = preset
        .builder(ArchKind::ImageNet, small_settings(preset, ArchKind::ImageNet, 4))
        .build();

    assert_eq!(graph[value_by_id(&graph, "stem")].shape, shape![1, 32, 112, 112]);
    // the first reduction cell already uses doubled filters
    assert_eq!(graph[value_by_id(&graph, "cell0")].shape, shape![1, 32, 56, 56]);
    assert_eq!(graph.output_shapes(), vec![shape![1, 1000]]);
}

#[test]
fn seed_determines_weights() {
    let build = |seed: u64| {
        let preset = NasNetPreset::Pnas;
        let settings = NasNetSettings {
            seed,
            ..small_settings(preset, ArchKind::Cifar, 4)
        };
        preset.builder(ArchKind::Cifar, settings).build()
    };
    let first_filter = |graph: &Graph| {
        graph
            .values()
            .find_map(|v| graph.as_const(v).filter(|data| data.len() > 16).map(|data| data.to_vec()))
            .unwrap()
    };

    let a = build(1);
    let b = build(1);
    let c = build(2);

    assert_eq!(a.summary(), b.summary());
    assert_eq!(first_filter(&a), first_filter(&b));
    assert_ne!(first_filter(&a), first_filter(&c));
    assert_eq!(a.summary().param_count, c.summary().param_count);
}

#[test]
fn custom_genotype() {
    let preset = NasNetPreset::Darts;
    let mut genotype = preset.genotype();
    genotype.normal = vec![];

    let builder = preset.builder(ArchKind::Cifar, small_settings(preset, ArchKind::Cifar, 4));
    assert!(builder.with_genotype(genotype).is_err());
}
