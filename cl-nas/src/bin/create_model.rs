use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use cl_graph::shape::Size;
use cl_nas::arch::ArchKind;
use cl_nas::cell::NasNetPreset;
use cl_nas::export::{export_model_to_path, ExportSettings};
use cl_nas::genotype::Genotype;
use cl_nas::randwire::{RandWireBuilder, RandWireSettings, RANDWIRE_NAME};
use cl_nas::result::{NasError, NasResult};

#[derive(Debug, Parser)]
#[clap(about = "Build a cell based network and export it as onnx")]
struct Args {
    /// One of nasnet, amoebanet, pnas, darts, nasnet_a or randwire.
    model: String,

    /// The dataset layout of a cell preset, defaults to cifar. Randwire always builds the imagenet layout.
    #[clap(short, long)]
    arch: Option<ArchKind>,

    #[clap(long)]
    num_stacked: Option<usize>,
    #[clap(long)]
    init_filters: Option<usize>,
    /// The channel count of the first randwire cell.
    #[clap(long)]
    channels: Option<usize>,

    /// Replace the normal cell, written as `op:arg` pairs, for example "sep3x3:0 id:1".
    #[clap(long, requires = "normal_concat")]
    normal: Option<String>,
    #[clap(long, value_delimiter = ',')]
    normal_concat: Option<Vec<usize>>,
    /// Replace the reduction cell, written like the normal cell.
    #[clap(long, requires = "reduction_concat")]
    reduction: Option<String>,
    #[clap(long, value_delimiter = ',')]
    reduction_concat: Option<Vec<usize>>,

    #[clap(long, default_value_t = 1)]
    batch: usize,
    /// Keep the batch size symbolic.
    #[clap(long)]
    dynamic_batch: bool,
    #[clap(long, default_value_t = 0)]
    seed: u64,
    /// Keep the batch norms separate from the convolutions.
    #[clap(long)]
    no_fuse: bool,

    /// Defaults to `model/<name>.onnx`.
    #[clap(short, long)]
    output: Option<PathBuf>,
}

impl Args {
    /// Reject options that the chosen model would silently ignore.
    fn check_options(&self) -> NasResult<()> {
        let randwire = self.model == RANDWIRE_NAME;
        let preset_only = [
            ("arch", self.arch.is_some()),
            ("num-stacked", self.num_stacked.is_some()),
            ("init-filters", self.init_filters.is_some()),
            ("normal", self.normal.is_some()),
            ("reduction", self.reduction.is_some()),
        ];

        let unsupported = if randwire {
            preset_only.iter().find(|(_, set)| *set).map(|&(name, _)| name)
        } else {
            self.channels.is_some().then_some("channels")
        };
        match unsupported {
            Some(option) => Err(NasError::UnsupportedOption(self.model.clone(), option)),
            None => Ok(()),
        }
    }
}

fn main() -> NasResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "cl_nas=info".into()),
        )
        .init();

    let args = Args::parse();
    args.check_options()?;
    let batch = if args.dynamic_batch {
        Size::BATCH
    } else {
        Size::fixed(args.batch)
    };

    let (name, graph) = if args.model == RANDWIRE_NAME {
        let defaults = RandWireSettings::default();
        let settings = RandWireSettings {
            channels: args.channels.unwrap_or(defaults.channels),
            batch,
            seed: args.seed,
            ..defaults
        };
        (RANDWIRE_NAME.to_owned(), RandWireBuilder::new(settings).build())
    } else {
        let preset: NasNetPreset = args.model.parse()?;

        let arch = args.arch.unwrap_or(ArchKind::Cifar);

        let mut settings = preset.settings(arch);
        settings.num_stacked = args.num_stacked.unwrap_or(settings.num_stacked);
        settings.init_filters = args.init_filters.unwrap_or(settings.init_filters);
        settings.batch = batch;
        settings.seed = args.seed;

        let mut genotype = preset.genotype();
        if let (Some(blocks), Some(concat)) = (&args.normal, &args.normal_concat) {
            genotype.normal = Genotype::parse_blocks(blocks)?;
            genotype.normal_concat = concat.clone();
        }
        if let (Some(blocks), Some(concat)) = (&args.reduction, &args.reduction_concat) {
            genotype.reduction = Genotype::parse_blocks(blocks)?;
            genotype.reduction_concat = concat.clone();
        }
        info!("Genotype:\n{}", genotype);

        let builder = preset.builder(arch, settings).with_genotype(genotype)?;
        (builder.model_name(), builder.build())
    };

    let export_settings = ExportSettings {
        fuse_bn_into_conv: !args.no_fuse,
        batch: None,
    };
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(format!("model/{}.onnx", name)));
    export_model_to_path(&graph, &name, export_settings, &output)?;
    info!("Wrote {:?}", output);

    Ok(())
}

#[cfg(test)]
mod test {
    use clap::Parser;

    use super::Args;

    fn check(args: &[&str]) -> bool {
        let args = Args::try_parse_from(std::iter::once("create_model").chain(args.iter().copied())).unwrap();
        args.check_options().is_ok()
    }

    #[test]
    fn options_must_apply_to_model() {
        assert!(check(&["darts", "-a", "imagenet", "--num-stacked", "2"]));
        assert!(check(&["randwire", "--channels", "32", "--seed", "3"]));

        assert!(!check(&["randwire", "-a", "cifar"]));
        assert!(!check(&["randwire", "--init-filters", "16"]));
        assert!(!check(&["nasnet", "--channels", "32"]));
    }
}
