use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::arch::CellKind;
use crate::ops::CellOp;

/// A single block input: apply `op` to hidden state `arg`.
///
/// Hidden state 0 is the output of the cell before the previous one, state 1 the output of the previous cell
/// and state `i + 2` the output of block `i` of the current cell.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Block {
    pub op: CellOp,
    pub arg: usize,
}

/// The learned structure of a normal and a reduction cell.
///
/// Every block sums the results of its two ops, the cell output is the channel-wise concatenation
/// of the states listed in the corresponding `concat`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Genotype {
    pub normal: Vec<[Block; 2]>,
    pub normal_concat: Vec<usize>,
    pub reduction: Vec<[Block; 2]>,
    pub reduction_concat: Vec<usize>,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum GenotypeError {
    #[error("unknown cell operation {0:?}")]
    UnknownOp(String),
    #[error("{0} cell has no blocks")]
    EmptyCell(CellKind),
    #[error("{kind} cell block {block} refers to state {arg}, but only {available} states exist at that point")]
    InvalidArg {
        kind: CellKind,
        block: usize,
        arg: usize,
        available: usize,
    },
    #[error("{kind} cell concatenates state {index}, but the cell only has {available} states")]
    InvalidConcat {
        kind: CellKind,
        index: usize,
        available: usize,
    },
    #[error("{0} cell has an empty concat list")]
    EmptyConcat(CellKind),
    #[error("reduction cell concatenates unreduced input state {0}")]
    UnreducedConcat(usize),
    #[error("invalid block {0:?}, expected the form `op:arg`")]
    InvalidBlock(String),
}

impl Block {
    pub fn new(op: CellOp, arg: usize) -> Self {
        Block { op, arg }
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.op, self.arg)
    }
}

impl std::str::FromStr for Block {
    type Err = GenotypeError;

    /// Parse a block written as `op:arg`, for example `sep3x3:1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (op, arg) = s.split_once(':').ok_or_else(|| GenotypeError::InvalidBlock(s.to_owned()))?;
        let arg = arg
            .trim()
            .parse()
            .map_err(|_| GenotypeError::InvalidBlock(s.to_owned()))?;
        Ok(Block::new(op.trim().parse()?, arg))
    }
}

fn cell(blocks: &[[(CellOp, usize); 2]]) -> Vec<[Block; 2]> {
    blocks
        .iter()
        .map(|&[(left_op, left_arg), (right_op, right_arg)]| [Block::new(left_op, left_arg), Block::new(right_op, right_arg)])
        .collect()
}

impl Genotype {
    /// Build a genotype, checking that every block only refers to states that exist before it
    /// and that every concatenated state exists.
    pub fn new(
        normal: Vec<[Block; 2]>,
        normal_concat: Vec<usize>,
        reduction: Vec<[Block; 2]>,
        reduction_concat: Vec<usize>,
    ) -> Result<Self, GenotypeError> {
        let genotype = Genotype {
            normal,
            normal_concat,
            reduction,
            reduction_concat,
        };
        genotype.validate()?;
        Ok(genotype)
    }

    pub fn validate(&self) -> Result<(), GenotypeError> {
        for kind in [CellKind::Normal, CellKind::Reduction] {
            let (blocks, concat) = self.cell(kind);

            if blocks.is_empty() {
                return Err(GenotypeError::EmptyCell(kind));
            }
            if concat.is_empty() {
                return Err(GenotypeError::EmptyConcat(kind));
            }

            for (block, pair) in blocks.iter().enumerate() {
                let available = block + 2;
                for input in pair {
                    if input.arg >= available {
                        return Err(GenotypeError::InvalidArg {
                            kind,
                            block,
                            arg: input.arg,
                            available,
                        });
                    }
                }
            }

            let available = blocks.len() + 2;
            for &index in concat {
                if index >= available {
                    return Err(GenotypeError::InvalidConcat { kind, index, available });
                }
                if kind == CellKind::Reduction && index < 2 {
                    return Err(GenotypeError::UnreducedConcat(index));
                }
            }
        }

        Ok(())
    }

    /// The blocks and concatenated states of the given cell kind.
    pub fn cell(&self, kind: CellKind) -> (&[[Block; 2]], &[usize]) {
        match kind {
            CellKind::Normal => (&self.normal, &self.normal_concat),
            CellKind::Reduction => (&self.reduction, &self.reduction_concat),
        }
    }

    /// Parse the blocks of a cell, written as whitespace separated `op:arg` pairs.
    /// For example `"sep3x3:0 sep3x3:1 id:0 avg3x3:1"` describes a cell with two blocks.
    pub fn parse_blocks(s: &str) -> Result<Vec<[Block; 2]>, GenotypeError> {
        let inputs: Vec<Block> = s.split_whitespace().map(str::parse).collect::<Result<_, _>>()?;
        if inputs.len() % 2 != 0 {
            let last = inputs.last().map_or(String::new(), |b| b.to_string());
            return Err(GenotypeError::InvalidBlock(last));
        }

        Ok(inputs.chunks_exact(2).map(|pair| [pair[0], pair[1]]).collect())
    }

    /// The cell found by NASNet-A.
    pub fn nasnet() -> Self {
        use CellOp::*;
        Genotype {
            normal: cell(&[
                [(Sep5x5, 1), (Sep3x3, 0)],
                [(Sep5x5, 0), (Sep3x3, 0)],
                [(Avg3x3, 1), (Id, 0)],
                [(Avg3x3, 0), (Avg3x3, 0)],
                [(Sep3x3, 1), (Id, 1)],
            ]),
            normal_concat: vec![0, 2, 3, 4, 5, 6],
            reduction: cell(&[
                [(Sep5x5, 1), (Sep7x7, 0)],
                [(Max3x3, 1), (Sep5x5, 0)],
                [(Avg3x3, 1), (Sep5x5, 0)],
                [(Id, 3), (Avg3x3, 2)],
                [(Sep3x3, 2), (Max3x3, 1)],
            ]),
            reduction_concat: vec![3, 4, 5, 6],
        }
    }

    /// The cell found by regularized evolution (AmoebaNet-A).
    pub fn amoebanet() -> Self {
        use CellOp::*;
        Genotype {
            normal: cell(&[
                [(Avg3x3, 0), (Max3x3, 0)],
                [(Id, 0), (Avg3x3, 1)],
                [(Sep5x5, 2), (Sep3x3, 1)],
                [(Sep3x3, 2), (Id, 1)],
                [(Avg3x3, 4), (Sep3x3, 0)],
            ]),
            normal_concat: vec![3, 5, 6],
            reduction: cell(&[
                [(Avg3x3, 0), (Sep3x3, 1)],
                [(Max3x3, 1), (Max3x3, 0)],
                [(Max3x3, 0), (Sep7x7, 2)],
                [(Sep7x7, 0), (Avg3x3, 1)],
                [(Sep3x3, 3), (Conv1x77x1, 0)],
            ]),
            reduction_concat: vec![4, 5, 6],
        }
    }

    /// The cell found by progressive NAS, shared between normal and reduction cells.
    pub fn pnas() -> Self {
        use CellOp::*;
        let blocks = cell(&[
            [(Sep5x5, 0), (Max3x3, 0)],
            [(Sep7x7, 1), (Max3x3, 1)],
            [(Sep5x5, 1), (Sep3x3, 1)],
            [(Sep3x3, 4), (Max3x3, 1)],
            [(Sep3x3, 0), (Avg1x1, 1)],
        ]);
        let concat = vec![2, 3, 4, 5, 6];
        Genotype {
            normal: blocks.clone(),
            normal_concat: concat.clone(),
            reduction: blocks,
            reduction_concat: concat,
        }
    }

    /// The second order DARTS cell.
    pub fn darts() -> Self {
        use CellOp::*;
        Genotype {
            normal: cell(&[
                [(Sep3x3, 0), (Sep3x3, 1)],
                [(Sep3x3, 0), (Sep3x3, 1)],
                [(Sep3x3, 1), (Id, 0)],
                [(Id, 0), (Dil3x3, 2)],
            ]),
            normal_concat: vec![2, 3, 4, 5],
            reduction: cell(&[
                [(Max3x3, 0), (Max3x3, 1)],
                [(Id, 2), (Max3x3, 1)],
                [(Max3x3, 0), (Id, 2)],
                [(Id, 2), (Max3x3, 1)],
            ]),
            reduction_concat: vec![2, 3, 4, 5],
        }
    }
}

impl Display for Genotype {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for kind in [CellKind::Normal, CellKind::Reduction] {
            let (blocks, concat) = self.cell(kind);
            writeln!(f, "{}:", kind)?;
            for (i, [left, right]) in blocks.iter().enumerate() {
                writeln!(f, "  {} = {} + {}", i + 2, left, right)?;
            }
            writeln!(f, "  concat {:?}", concat)?;
        }
        Ok(())
    }
}
