#![warn(missing_debug_implementations)]
#![allow(clippy::new_without_default)]

//! A convolutional network graph intermediate representation, with ONNX import, export and editing.
//!
//! The core type of this crate is [Graph](graph::Graph),
//! see its documentation for how to manually build and compose graphs.
//!
//! An example demonstrating some of the features of this crate:
//! ```no_run
//! # use cl_graph::onnx::load_graph_from_onnx_path;
//! # use cl_graph::onnx::save_graph_to_onnx_path;
//! # use cl_graph::onnx::save::SaveSettings;
//! # use cl_graph::optimizer::optimize_graph;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // load an onnx file, keeping the batch size symbolic
//! let graph = load_graph_from_onnx_path("test.onnx", None)?;
//!
//! // fold batchnorms into the preceding convolutions
//! let graph = optimize_graph(&graph, Default::default());
//! println!("{}", graph.summary());
//!
//! // write it back out with a fixed batch size
//! let settings = SaveSettings {
//!     batch: Some(1),
//!     ..Default::default()
//! };
//! save_graph_to_onnx_path(&graph, &settings, "test_opt.onnx")?;
//! # Ok(())
//! # }
//! ```

/// The core graph datastructure.
pub mod graph;
/// Graph optimization.
pub mod optimizer;
/// The [Shape](shape::Shape) type and utilities.
pub mod shape;

/// Onnx file loading, saving and patching.
pub mod onnx;
