use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cl_graph::shape::Size;
use cl_nas::arch::ArchKind;
use cl_nas::cell::{NasNetPreset, NasNetSettings};
use cl_nas::export::{export_model, ExportSettings};
use cl_sched::graph::OpGraph;
use cl_sched::life::{compute_lifetime, estimate_peak};
use cl_sched::order::reverse_post_order;
use cl_sched::plan::best_fit;
use cl_sched::sched::{hierarchical_schedule, SchedSettings};

fn darts(num_stacked: usize) -> OpGraph {
    let preset = NasNetPreset::Darts;
    let settings = NasNetSettings {
        num_stacked,
        init_filters: 16,
        batch: Size::fixed(1),
        ..preset.settings(ArchKind::Cifar)
    };
    let builder = preset.builder(ArchKind::Cifar, settings);
    let model = export_model(&builder.build(), &builder.model_name(), ExportSettings::default()).unwrap();
    OpGraph::from_model(&model).unwrap()
}

fn bench_schedule(c: &mut Criterion) {
    for num_stacked in [1, 2] {
        let graph = darts(num_stacked);
        let rpo = reverse_post_order(&graph);
        println!(
            "Name: darts_{}, ops: {}, rpo peak: {}",
            num_stacked,
            graph.op_count(),
            estimate_peak(&graph, &rpo)
        );

        c.bench_function(&format!("estimate_peak darts_{}", num_stacked), |b| {
            b.iter(|| black_box(estimate_peak(&graph, &rpo)))
        });

        let stat = compute_lifetime(&graph, &rpo);
        c.bench_function(&format!("best_fit darts_{}", num_stacked), |b| {
            b.iter(|| black_box(best_fit(&stat).peak))
        });

        let settings = SchedSettings {
            max_states: 16,
            ..Default::default()
        };
        c.bench_function(&format!("hierarchical darts_{}", num_stacked), |b| {
            b.iter(|| black_box(hierarchical_schedule(&graph, &settings).peak))
        });
    }
}

criterion_group!(
    name=benches;
    config=Criterion::default().measurement_time(Duration::from_secs(10)).sample_size(10);
    targets=bench_schedule
);
criterion_main!(benches);
