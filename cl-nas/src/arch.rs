use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use cl_graph::graph::{ConvParams, Value};

use crate::cell::Variant;
use crate::layers::Layers;
use crate::result::NasError;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CellKind {
    Normal,
    Reduction,
}

/// The dataset-specific frame around the stacked cells: input, stem and the cell stacking pattern.
pub trait Architecture: Debug {
    fn name(&self) -> &str;

    /// The `(channels, height, width)` of a single input image.
    fn input_shape(&self) -> [usize; 3];

    fn num_classes(&self) -> usize;

    /// Build the stem, the convolution that turns the input image into the first hidden state.
    fn stem(&self, net: &mut Layers, input: Value, filters: usize, variant: Variant) -> Value;

    /// The kinds of the cells, in stacking order.
    fn cells(&self, num_stacked: usize) -> Vec<CellKind>;
}

/// Small 32x32 images, with two reductions between three stacks of normal cells.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Cifar {
    pub num_classes: usize,
}

/// Large 224x224 images, with two extra reduction cells in front to quickly shrink the input.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct ImageNet;

impl Default for Cifar {
    fn default() -> Self {
        Cifar { num_classes: 100 }
    }
}

impl Architecture for Cifar {
    fn name(&self) -> &str {
        "cifar"
    }

    fn input_shape(&self) -> [usize; 3] {
        [3, 32, 32]
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn stem(&self, net: &mut Layers, input: Value, filters: usize, _: Variant) -> Value {
        let x = net.conv(input, filters, (3, 3), ConvParams::same(1));
        net.batch_norm(x)
    }

    fn cells(&self, num_stacked: usize) -> Vec<CellKind> {
        stacks(vec![], num_stacked)
    }
}

impl Architecture for ImageNet {
    fn name(&self) -> &str {
        "imagenet"
    }

    fn input_shape(&self) -> [usize; 3] {
        [3, 224, 224]
    }

    fn num_classes(&self) -> usize {
        1000
    }

    fn stem(&self, net: &mut Layers, input: Value, filters: usize, variant: Variant) -> Value {
        let params = match variant {
            Variant::Nas => ConvParams::same(2),
            Variant::NasNet => ConvParams::valid(2),
        };
        let x = net.conv(input, filters, (3, 3), params);
        net.batch_norm(x)
    }

    fn cells(&self, num_stacked: usize) -> Vec<CellKind> {
        stacks(vec![CellKind::Reduction; 2], num_stacked)
    }
}

/// Append three stacks of `num_stacked` normal cells separated by reduction cells.
fn stacks(mut cells: Vec<CellKind>, num_stacked: usize) -> Vec<CellKind> {
    for stack in 0..3 {
        if stack != 0 {
            cells.push(CellKind::Reduction);
        }
        cells.extend(std::iter::repeat(CellKind::Normal).take(num_stacked));
    }
    cells
}

/// The architectures that can be selected by name.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ArchKind {
    Cifar,
    ImageNet,
}

impl ArchKind {
    pub fn architecture(self) -> Box<dyn Architecture> {
        match self {
            ArchKind::Cifar => Box::new(Cifar::default()),
            ArchKind::ImageNet => Box::new(ImageNet),
        }
    }
}

impl FromStr for ArchKind {
    type Err = NasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cifar" | "cifar100" => Ok(ArchKind::Cifar),
            "imagenet" => Ok(ArchKind::ImageNet),
            _ => Err(NasError::UnknownArchitecture(s.to_owned())),
        }
    }
}

impl Display for CellKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CellKind::Normal => write!(f, "normal"),
            CellKind::Reduction => write!(f, "reduction"),
        }
    }
}
