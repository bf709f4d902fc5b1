use std::str::FromStr;

use cl_graph::graph::{ConvParams, Graph, PaddingMode, PoolOp, SliceRange, Value};
use cl_graph::shape;
use cl_graph::shape::Size;

use crate::arch::{ArchKind, Architecture, CellKind};
use crate::genotype::{Block, Genotype, GenotypeError};
use crate::init::{GlorotUniform, Initializer};
use crate::layers::Layers;
use crate::result::NasError;

/// The two recipes used to stack cells, they differ in small but shape-relevant details.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Variant {
    /// Filters double before a reduction cell is built. Cell inputs are prepared by squeezing the current state
    /// first and then fitting the previous one to it. All stems use same padding.
    Nas,
    /// Filters double after a reduction cell is built. The previous state is fitted to the unsqueezed current one
    /// before the latter is squeezed. The ImageNet stem uses valid padding.
    NasNet,
}

#[derive(Debug, Clone)]
pub struct NasNetSettings {
    /// The number of normal cells in each stack.
    pub num_stacked: usize,
    /// The number of filters of the cells in the first stack.
    pub init_filters: usize,
    pub stem_filters: usize,
    pub batch: Size,
    pub variant: Variant,
    /// Seed for the weight initialization.
    pub seed: u64,
}

impl Default for NasNetSettings {
    fn default() -> Self {
        NasNetSettings {
            num_stacked: 6,
            init_filters: 32,
            stem_filters: 32,
            batch: Size::fixed(1),
            variant: Variant::Nas,
            seed: 0,
        }
    }
}

/// Expands a [Genotype] into a full network for an [Architecture].
#[derive(Debug)]
pub struct NasNetBuilder {
    name: String,
    arch: Box<dyn Architecture>,
    genotype: Genotype,
    settings: NasNetSettings,
}

impl NasNetBuilder {
    pub fn new(
        name: impl Into<String>,
        arch: Box<dyn Architecture>,
        genotype: Genotype,
        settings: NasNetSettings,
    ) -> Result<Self, GenotypeError> {
        genotype.validate()?;

        Ok(NasNetBuilder {
            name: name.into(),
            arch,
            genotype,
            settings,
        })
    }

    /// Replace the genotype, for example to try a modified cell with the frame of a preset.
    pub fn with_genotype(self, genotype: Genotype) -> Result<Self, GenotypeError> {
        genotype.validate()?;
        Ok(NasNetBuilder { genotype, ..self })
    }

    pub fn settings(&self) -> &NasNetSettings {
        &self.settings
    }

    pub fn genotype(&self) -> &Genotype {
        &self.genotype
    }

    pub fn model_name(&self) -> String {
        format!("{}-{}", self.name, self.arch.name())
    }

    pub fn build(&self) -> Graph {
        self.build_with(GlorotUniform::new(self.settings.seed))
    }

    pub fn build_with(&self, init: impl Initializer + 'static) -> Graph {
        let settings = &self.settings;
        let mut net = Layers::new(init);

        let [channels, height, width] = self.arch.input_shape();
        let input = net.graph.input(shape![settings.batch, channels, height, width]);
        let mut cur = self
            .arch
            .stem(&mut net, input, settings.stem_filters, settings.variant);
        net.graph.set_debug_id(cur, "stem".to_owned());

        let mut prev = None;
        let mut filters = settings.init_filters;

        for (i, kind) in self.arch.cells(settings.num_stacked).into_iter().enumerate() {
            let reduction = kind == CellKind::Reduction;

            if reduction && settings.variant == Variant::Nas {
                filters *= 2;
            }
            let next = self.cell(&mut net, prev, cur, filters, kind);
            if reduction && settings.variant == Variant::NasNet {
                filters *= 2;
            }

            net.graph.set_debug_id(next, format!("cell{}", i));
            tracing::debug!("cell {} ({}): {}", i, kind, net.graph[next].shape);

            prev = Some(cur);
            cur = next;
        }

        let output = net.classifier(cur, self.arch.num_classes());
        net.graph.output(output);

        let graph = net.into_graph();
        tracing::info!("built {}: {}", self.model_name(), graph.summary());
        graph
    }

    fn cell(&self, net: &mut Layers, prev: Option<Value>, cur: Value, filters: usize, kind: CellKind) -> Value {
        let (prev, cur) = match self.settings.variant {
            Variant::Nas => {
                let cur = squeeze(net, cur, filters);
                let prev = fit(net, prev, cur, filters);
                (prev, cur)
            }
            Variant::NasNet => {
                let prev = fit(net, prev, cur, filters);
                let cur = squeeze(net, cur, filters);
                (prev, cur)
            }
        };

        let (blocks, concat) = self.genotype.cell(kind);
        let reduction = kind == CellKind::Reduction;

        let mut states = vec![prev, cur];
        for [left, right] in blocks {
            let left = create_op(net, &states, *left, filters, reduction);
            let right = create_op(net, &states, *right, filters, reduction);
            let sum = net.graph.add(left, right);
            states.push(sum);
        }

        let outputs = concat.iter().map(|&index| states[index]).collect();
        net.graph.concat(outputs, 1)
    }
}

/// Apply a single block input. In reduction cells the ops reading the cell inputs use stride 2.
fn create_op(net: &mut Layers, states: &[Value], block: Block, filters: usize, reduction: bool) -> Value {
    let stride = if reduction && block.arg < 2 { 2 } else { 1 };
    block.op.apply(net, states[block.arg], filters, stride)
}

/// Relu, pointwise convolution to `filters` channels and batch norm.
#[must_use]
pub fn squeeze(net: &mut Layers, x: Value, filters: usize) -> Value {
    let x = net.graph.relu(x);
    let x = net.conv(x, filters, (1, 1), ConvParams::same(1));
    net.batch_norm(x)
}

/// Bring `src` to the spatial size of `target` with `filters` channels.
///
/// Without `src` the target itself is used. A source with the same height is only squeezed,
/// otherwise its spatial size is halved with [factorized_reduce].
#[must_use]
pub fn fit(net: &mut Layers, src: Option<Value>, target: Value, filters: usize) -> Value {
    let Some(src) = src else {
        return target;
    };

    let (src_h, _) = net.spatial(src);
    let (target_h, _) = net.spatial(target);

    if src_h == target_h {
        squeeze(net, src, filters)
    } else {
        let result = factorized_reduce(net, src, filters);
        assert_eq!(
            net.spatial(result),
            net.spatial(target),
            "Cannot fit {} to {}",
            net.graph[src].shape,
            net.graph[target].shape
        );
        result
    }
}

/// Halve the spatial size of `x` with two strided pointwise convolutions,
/// the second one shifted by one pixel, and concatenate them to `filters` channels.
#[must_use]
pub fn factorized_reduce(net: &mut Layers, x: Value, filters: usize) -> Value {
    let x = net.graph.relu(x);
    let half = filters / 2;

    let p1 = net.graph.pool(x, PoolOp::Avg, (1, 1), (2, 2), PaddingMode::Valid);
    let p1 = net.conv(p1, half, (1, 1), ConvParams::valid(1));

    let p2 = net.graph.pad(x, vec![(0, 0), (0, 0), (0, 1), (0, 1)]);
    let (height, width) = net.spatial(p2);
    let p2 = net.graph.slice(p2, 2, SliceRange::simple(1, height));
    let p2 = net.graph.slice(p2, 3, SliceRange::simple(1, width));
    let p2 = net.graph.pool(p2, PoolOp::Avg, (1, 1), (2, 2), PaddingMode::Valid);
    let p2 = net.conv(p2, filters - half, (1, 1), ConvParams::valid(1));

    let x = net.graph.concat(vec![p1, p2], 1);
    net.batch_norm(x)
}

/// Squeeze `x` to `filters` channels if it does not have that many already.
#[must_use]
pub fn match_channels(net: &mut Layers, x: Value, filters: usize) -> Value {
    if net.channels(x) == filters {
        x
    } else {
        squeeze(net, x, filters)
    }
}

/// The published cell based networks, with the filter counts of their original recipes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum NasNetPreset {
    NasNet,
    AmoebaNet,
    Pnas,
    Darts,
    /// NASNet-A stacked with the [Variant::NasNet] recipe.
    NasNetA,
}

impl NasNetPreset {
    pub const ALL: [NasNetPreset; 5] = [
        NasNetPreset::NasNet,
        NasNetPreset::AmoebaNet,
        NasNetPreset::Pnas,
        NasNetPreset::Darts,
        NasNetPreset::NasNetA,
    ];

    pub fn name(self) -> &'static str {
        match self {
            NasNetPreset::NasNet => "nasnet",
            NasNetPreset::AmoebaNet => "amoebanet",
            NasNetPreset::Pnas => "pnas",
            NasNetPreset::Darts => "darts",
            NasNetPreset::NasNetA => "nasnet_a",
        }
    }

    pub fn genotype(self) -> Genotype {
        match self {
            NasNetPreset::NasNet | NasNetPreset::NasNetA => Genotype::nasnet(),
            NasNetPreset::AmoebaNet => Genotype::amoebanet(),
            NasNetPreset::Pnas => Genotype::pnas(),
            NasNetPreset::Darts => Genotype::darts(),
        }
    }

    pub fn variant(self) -> Variant {
        match self {
            NasNetPreset::NasNetA => Variant::NasNet,
            _ => Variant::Nas,
        }
    }

    /// The `(num_stacked, init_filters)` pair used for the given architecture.
    pub fn size(self, arch: ArchKind) -> (usize, usize) {
        match (self, arch) {
            (NasNetPreset::NasNet, ArchKind::Cifar) => (6, 32),
            (NasNetPreset::NasNet, ArchKind::ImageNet) => (4, 11),
            (NasNetPreset::AmoebaNet, ArchKind::Cifar) => (6, 36),
            (NasNetPreset::AmoebaNet, ArchKind::ImageNet) => (4, 12),
            (NasNetPreset::Pnas, ArchKind::Cifar) => (6, 32),
            (NasNetPreset::Pnas, ArchKind::ImageNet) => (4, 12),
            (NasNetPreset::Darts, ArchKind::Cifar) => (6, 36),
            (NasNetPreset::Darts, ArchKind::ImageNet) => (4, 12),
            (NasNetPreset::NasNetA, ArchKind::Cifar) => (4, 44),
            (NasNetPreset::NasNetA, ArchKind::ImageNet) => (4, 11),
        }
    }

    pub fn settings(self, arch: ArchKind) -> NasNetSettings {
        let (num_stacked, init_filters) = self.size(arch);
        NasNetSettings {
            num_stacked,
            init_filters,
            variant: self.variant(),
            ..Default::default()
        }
    }

    pub fn builder(self, arch: ArchKind, settings: NasNetSettings) -> NasNetBuilder {
        NasNetBuilder {
            name: self.name().to_owned(),
            arch: arch.architecture(),
            genotype: self.genotype(),
            settings,
        }
    }
}

impl FromStr for NasNetPreset {
    type Err = NasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NasNetPreset::ALL
            .iter()
            .copied()
            .find(|preset| preset.name() == s || (*preset == NasNetPreset::NasNetA && s == "nasnet-a"))
            .ok_or_else(|| NasError::UnknownModel(s.to_owned()))
    }
}
