use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use cl_graph::onnx::edit::{change_batch_size, infer_shapes, prune_unused_initializers, remove_cnn_preproc, shorten_names};
use cl_graph::onnx::info::format_model_info;
use cl_graph::onnx::result::OnnxResult;
use cl_graph::onnx::{load_graph_from_onnx_path, load_model_from_path, save_model_to_path};

#[derive(Debug, Parser)]
#[clap(about = "Patch and inspect onnx files")]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fix the batch size of the inputs and outputs and recompute intermediate shapes.
    Batch { input: PathBuf, output: PathBuf, batch: usize },
    /// Strip everything up to and including `prefix` from all names.
    Shorten {
        input: PathBuf,
        output: PathBuf,
        prefix: String,
    },
    /// Remove the NHWC preprocessing in front of the first Transpose.
    StripPreproc {
        input: PathBuf,
        output: PathBuf,
        #[clap(long)]
        prefix: Option<String>,
    },
    /// Print the nodes and initializers, and the graph as it would be loaded.
    Info {
        input: PathBuf,
        #[clap(long, default_value = "")]
        prefix: String,
        #[clap(short, long)]
        graph: bool,
    },
}

fn main() -> OnnxResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "cl_graph=info".into()),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Batch { input, output, batch } => {
            let mut model = load_model_from_path(&input)?;
            change_batch_size(&mut model, batch)?;
            infer_shapes(&mut model)?;
            save_model_to_path(&model, &output)?;
            info!("Wrote {:?} with batch size {}", output, batch);
        }
        Command::Shorten { input, output, prefix } => {
            let mut model = load_model_from_path(&input)?;
            shorten_names(&mut model, &prefix)?;
            save_model_to_path(&model, &output)?;
            info!("Wrote {:?} with names shortened after {:?}", output, prefix);
        }
        Command::StripPreproc { input, output, prefix } => {
            let mut model = load_model_from_path(&input)?;
            remove_cnn_preproc(&mut model)?;
            if let Some(prefix) = prefix {
                shorten_names(&mut model, &prefix)?;
            }
            let pruned = prune_unused_initializers(&mut model)?;
            save_model_to_path(&model, &output)?;
            info!("Wrote {:?}, pruned {} unused initializers", output, pruned);
        }
        Command::Info { input, prefix, graph } => {
            let model = load_model_from_path(&input)?;
            print!("{}", format_model_info(&model, &prefix)?);

            if graph {
                let graph = load_graph_from_onnx_path(&input, None)?;
                println!("{}", graph);
                print!("{}", graph.summary());
            }
        }
    }

    Ok(())
}
