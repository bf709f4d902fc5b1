use std::path::PathBuf;

use clap::Parser;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::info;

use cl_graph::onnx::load_model_from_path;
use cl_sched::graph::OpGraph;
use cl_sched::life::{compute_lifetime, estimate_peak};
use cl_sched::order::{random_sample, reverse_post_order};
use cl_sched::pass::GroupSettings;
use cl_sched::plan::best_fit;
use cl_sched::result::SchedResult;
use cl_sched::sched::{hierarchical_schedule, SchedSettings};

#[derive(Debug, Parser)]
#[clap(about = "Schedule the ops of an onnx model for a low peak memory usage")]
struct Args {
    path: PathBuf,

    /// Fix symbolic batch dimensions to this size.
    #[clap(long)]
    batch: Option<usize>,

    /// Also report the peaks of this many random topological orders.
    #[clap(long, default_value_t = 0)]
    random_samples: usize,
    #[clap(long, default_value_t = 0)]
    seed: u64,

    /// Plan the memory of the schedule with best-fit and print the plan.
    #[clap(long)]
    plan: bool,

    /// Do not group the sequences of every cell.
    #[clap(long)]
    no_groups: bool,
    /// Do not group the ops right behind a cell output.
    #[clap(long)]
    no_intrusion: bool,
    /// The op type that ends a cell.
    #[clap(long, default_value = "Concat")]
    cell_output: String,
    #[clap(long, default_value_t = 64)]
    max_states: usize,
}

fn main() -> SchedResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "cl_sched=info".into()),
        )
        .init();

    let args = Args::parse();

    let model = load_model_from_path(&args.path)?;
    let graph = OpGraph::from_model_with_batch(&model, args.batch)?;
    info!("Loaded {:?}", graph);

    let groups = (!args.no_groups).then(|| GroupSettings {
        cell_output: args.cell_output.clone(),
        intrusion: !args.no_intrusion,
        ..Default::default()
    });
    let settings = SchedSettings {
        groups,
        max_states: args.max_states,
        ..Default::default()
    };

    let rpo = reverse_post_order(&graph);
    let rpo_peak = estimate_peak(&graph, &rpo);
    let schedule = hierarchical_schedule(&graph, &settings);

    println!("rpo peak:          {:>12}", rpo_peak);
    println!("hierarchical peak: {:>12}", schedule.peak);

    if args.random_samples > 0 {
        let mut rng = SmallRng::seed_from_u64(args.seed);
        let peaks = (0..args.random_samples)
            .map(|_| estimate_peak(&graph, &random_sample(&graph, &mut rng)))
            .collect::<Vec<_>>();

        let min = peaks.iter().min().copied().unwrap_or(0);
        let max = peaks.iter().max().copied().unwrap_or(0);
        let mean = peaks.iter().sum::<u64>() as f64 / peaks.len() as f64;
        println!(
            "random peak:       {:>12} min, {:.0} mean, {} max over {} samples",
            min,
            mean,
            max,
            peaks.len()
        );
    }

    if args.plan {
        let stat = compute_lifetime(&graph, &schedule.ops);
        let plan = best_fit(&stat);
        println!("planned peak:      {:>12}", plan.peak);
        println!("{}", plan);
    }

    Ok(())
}
