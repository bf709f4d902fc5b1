use std::fmt::{Display, Formatter};
use std::str::FromStr;

use cl_graph::graph::{ConvParams, PaddingMode, PoolOp, Value};

use crate::cell::{factorized_reduce, match_channels};
use crate::genotype::GenotypeError;
use crate::layers::Layers;

/// The fixed vocabulary of operations a cell block can apply to one of its inputs.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CellOp {
    Id,
    Sep3x3,
    Sep5x5,
    Sep7x7,
    Dil3x3,
    Dil5x5,
    Avg1x1,
    Avg3x3,
    Max3x3,
    Conv1x77x1,
}

impl CellOp {
    pub const ALL: [CellOp; 10] = [
        CellOp::Id,
        CellOp::Sep3x3,
        CellOp::Sep5x5,
        CellOp::Sep7x7,
        CellOp::Dil3x3,
        CellOp::Dil5x5,
        CellOp::Avg1x1,
        CellOp::Avg3x3,
        CellOp::Max3x3,
        CellOp::Conv1x77x1,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CellOp::Id => "id",
            CellOp::Sep3x3 => "sep3x3",
            CellOp::Sep5x5 => "sep5x5",
            CellOp::Sep7x7 => "sep7x7",
            CellOp::Dil3x3 => "dil3x3",
            CellOp::Dil5x5 => "dil5x5",
            CellOp::Avg1x1 => "avg1x1",
            CellOp::Avg3x3 => "avg3x3",
            CellOp::Max3x3 => "max3x3",
            CellOp::Conv1x77x1 => "1x77x1",
        }
    }

    /// Apply this operation to `x`.
    ///
    /// The result always has `filters` channels and its spatial size is divided by `stride`,
    /// rounding up.
    #[must_use]
    pub fn apply(self, net: &mut Layers, x: Value, filters: usize, stride: usize) -> Value {
        match self {
            CellOp::Id => match stride {
                1 => match_channels(net, x, filters),
                _ => factorized_reduce(net, x, filters),
            },
            CellOp::Sep3x3 => sep_conv(net, x, filters, 3, stride),
            CellOp::Sep5x5 => sep_conv(net, x, filters, 5, stride),
            CellOp::Sep7x7 => sep_conv(net, x, filters, 7, stride),
            CellOp::Dil3x3 => dil_conv(net, x, filters, 3, stride, 2),
            CellOp::Dil5x5 => dil_conv(net, x, filters, 5, stride, 2),
            CellOp::Avg1x1 => pool(net, x, PoolOp::Avg, 1, filters, stride),
            CellOp::Avg3x3 => pool(net, x, PoolOp::Avg, 3, filters, stride),
            CellOp::Max3x3 => pool(net, x, PoolOp::Max, 3, filters, stride),
            CellOp::Conv1x77x1 => conv_1xn_nx1(net, x, filters, 7, stride),
        }
    }
}

impl Display for CellOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CellOp {
    type Err = GenotypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CellOp::ALL
            .iter()
            .copied()
            .find(|op| op.name() == s)
            .ok_or_else(|| GenotypeError::UnknownOp(s.to_owned()))
    }
}

fn sep_conv(net: &mut Layers, x: Value, filters: usize, kernel: usize, stride: usize) -> Value {
    let x = net.graph.relu(x);
    let x = net.separable_conv(x, filters, kernel, ConvParams::same(stride));
    let x = net.batch_norm(x);
    let x = net.graph.relu(x);
    let x = net.separable_conv(x, filters, kernel, ConvParams::same(1));
    net.batch_norm(x)
}

fn dil_conv(net: &mut Layers, x: Value, filters: usize, kernel: usize, stride: usize, dilation: usize) -> Value {
    let x = net.graph.relu(x);
    let params = ConvParams::same(stride).with_dilation(dilation);
    let x = net.separable_conv(x, filters, kernel, params);
    net.batch_norm(x)
}

fn pool(net: &mut Layers, x: Value, op: PoolOp, kernel: usize, filters: usize, stride: usize) -> Value {
    let x = net
        .graph
        .pool(x, op, (kernel, kernel), (stride, stride), PaddingMode::Same);
    match_channels(net, x, filters)
}

fn conv_1xn_nx1(net: &mut Layers, x: Value, filters: usize, n: usize, stride: usize) -> Value {
    let x = net.conv(x, filters, (1, n), ConvParams::same(stride));
    let x = net.batch_norm(x);
    let x = net.conv(x, filters, (n, 1), ConvParams::same(1));
    net.batch_norm(x)
}
