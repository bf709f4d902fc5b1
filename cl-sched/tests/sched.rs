use cl_graph::graph::{ConvParams, Graph};
use cl_graph::onnx::save::{graph_to_model, SaveSettings};
use cl_graph::shape;
use cl_graph::shape::Size;
use cl_nas::arch::ArchKind;
use cl_nas::cell::{NasNetPreset, NasNetSettings};
use cl_nas::export::{export_model, ExportSettings};
use cl_nas::genotype::Genotype;
use cl_sched::graph::OpGraph;
use cl_sched::hier::HierGraph;
use cl_sched::life::{compute_lifetime, estimate_peak};
use cl_sched::order::{is_valid_order, reverse_post_order};
use cl_sched::pass::{join_sequences, make_groups, GroupSettings};
use cl_sched::plan::best_fit;
use cl_sched::sched::{hierarchical_schedule, SchedSettings, Schedule};

fn op_graph(graph: &Graph) -> OpGraph {
    let settings = SaveSettings {
        batch: Some(1),
        ..Default::default()
    };
    OpGraph::from_model(&graph_to_model(graph, &settings).unwrap()).unwrap()
}

/// `conv(x) + conv(conv(x))` with 16 channel results, where running the short branch first
/// keeps its result alive next to the two results of the long branch.
fn unbalanced() -> OpGraph {
    let mut graph = Graph::new();
    let x = graph.input(shape![Size::BATCH, 4, 8, 8]);
    let w_short = graph.constant(shape![16, 4, 1, 1], vec![0.5; 64]);
    let w_first = graph.constant(shape![16, 4, 1, 1], vec![0.25; 64]);
    let w_second = graph.constant(shape![16, 16, 1, 1], vec![0.125; 256]);

    let short = graph.conv(x, w_short, None, ConvParams::same(1));
    let long = graph.conv(x, w_first, None, ConvParams::same(1));
    let long = graph.conv(long, w_second, None, ConvParams::same(1));
    let y = graph.add(short, long);
    graph.output(y);
    op_graph(&graph)
}

fn darts(genotype: Option<Genotype>) -> OpGraph {
    let preset = NasNetPreset::Darts;
    let settings = NasNetSettings {
        num_stacked: 1,
        init_filters: 4,
        batch: Size::fixed(1),
        ..preset.settings(ArchKind::Cifar)
    };
    let mut builder = preset.builder(ArchKind::Cifar, settings);
    if let Some(genotype) = genotype {
        builder = builder.with_genotype(genotype).unwrap();
    }
    let model = export_model(&builder.build(), &builder.model_name(), ExportSettings::default()).unwrap();
    OpGraph::from_model(&model).unwrap()
}

/// Two blocks of cheap ops per cell.
fn small_genotype() -> Genotype {
    let mut genotype = NasNetPreset::Darts.genotype();
    genotype.normal = Genotype::parse_blocks("id:0 avg3x3:1 max3x3:2 id:1").unwrap();
    genotype.normal_concat = vec![2, 3];
    genotype.reduction = Genotype::parse_blocks("max3x3:0 avg3x3:1 id:2 max3x3:1").unwrap();
    genotype.reduction_concat = vec![2, 3];
    genotype
}

fn check_schedule(graph: &OpGraph, schedule: &Schedule) {
    assert!(is_valid_order(graph, &schedule.ops));
    assert_eq!(schedule.peak, estimate_peak(graph, &schedule.ops));
    assert!(schedule.peak <= estimate_peak(graph, &reverse_post_order(graph)));

    let stat = compute_lifetime(graph, &schedule.ops);
    assert_eq!(stat.peak(), schedule.peak);

    let plan = best_fit(&stat);
    assert!(plan.conflicts().is_empty());
    assert!(plan.peak >= schedule.peak);
}

#[test]
fn beats_rpo_on_unbalanced_branches() {
    let graph = unbalanced();

    let add = graph[graph.outputs()[0]].def.unwrap();
    let short = graph[add].inputs[0];

    let rpo = reverse_post_order(&graph);
    assert_eq!(graph[rpo[0]].outputs[0], short);
    assert_eq!(estimate_peak(&graph, &rpo), 12288);

    let schedule = hierarchical_schedule(&graph, &SchedSettings::default());
    check_schedule(&graph, &schedule);
    assert_eq!(schedule.peak, 9216);

    // the short branch runs last
    assert_eq!(graph[schedule.ops[2]].outputs[0], short);
}

#[test]
fn without_joining_or_groups() {
    let graph = unbalanced();
    let settings = SchedSettings {
        join_sequences: false,
        groups: None,
        ..Default::default()
    };

    let schedule = hierarchical_schedule(&graph, &settings);
    check_schedule(&graph, &schedule);
    assert_eq!(schedule.peak, 9216);
}

#[test]
fn single_state_still_valid() {
    let graph = darts(Some(small_genotype()));
    let settings = SchedSettings {
        max_states: 1,
        ..Default::default()
    };

    let schedule = hierarchical_schedule(&graph, &settings);
    check_schedule(&graph, &schedule);
}

#[test]
fn small_darts_groups() {
    let graph = darts(Some(small_genotype()));

    let mut hier = HierGraph::new(&graph);
    join_sequences(&mut hier);
    let sequences = hier.sequence_count();
    assert!(sequences < graph.op_count());

    make_groups(&mut hier, &GroupSettings::default());
    assert!(hier.group_count() > 0);
    assert_eq!(hier.sequence_count(), sequences);
    assert!(hier.top_level().len() < sequences);

    // every sequence is either on the top level or in exactly one live group
    for vert in hier.vertices() {
        if let Some(seq) = hier.as_seq(vert) {
            if let Some(group) = seq.group {
                assert!(hier.group(group).seqs.contains(&vert));
            }
        }
    }
}

#[test]
fn small_darts_schedule() {
    let graph = darts(Some(small_genotype()));

    let schedule = hierarchical_schedule(&graph, &SchedSettings::default());
    check_schedule(&graph, &schedule);

    let no_intrusion = SchedSettings {
        groups: Some(GroupSettings {
            intrusion: false,
            ..Default::default()
        }),
        ..Default::default()
    };
    check_schedule(&graph, &hierarchical_schedule(&graph, &no_intrusion));
}

#[test]
fn darts_schedule() {
    let graph = darts(None);
    let settings = SchedSettings {
        max_states: 16,
        ..Default::default()
    };
    let schedule = hierarchical_schedule(&graph, &settings);
    check_schedule(&graph, &schedule);
}
