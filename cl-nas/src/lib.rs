#![warn(missing_debug_implementations)]

//! Build cell based convolutional networks from their genotypes and export them as ONNX models.
//!
//! A [Genotype](genotype::Genotype) describes the blocks of a normal and a reduction cell,
//! an [Architecture](arch::Architecture) the input, the stem and the order in which cells are stacked.
//! [NasNetBuilder](cell::NasNetBuilder) expands both into a [Graph](cl_graph::graph::Graph):
//! ```
//! # use cl_nas::arch::ArchKind;
//! # use cl_nas::cell::NasNetPreset;
//! let preset = NasNetPreset::Darts;
//! let mut settings = preset.settings(ArchKind::Cifar);
//! settings.num_stacked = 1;
//!
//! let graph = preset.builder(ArchKind::Cifar, settings).build();
//! assert_eq!(graph.output_shapes()[0].to_string(), "(1 x 100)");
//! ```
//!
//! Randomly wired networks are built by [RandWireBuilder](randwire::RandWireBuilder).

pub mod arch;
pub mod cell;
pub mod export;
pub mod genotype;
pub mod init;
pub mod layers;
pub mod ops;
pub mod randwire;
pub mod result;
