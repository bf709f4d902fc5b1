#![warn(missing_debug_implementations)]

//! Memory-aware operator scheduling for ONNX models.
//!
//! An [OpGraph](graph::OpGraph) is built from an onnx model and records the size of every value.
//! Given an order of its ops [life] computes when every value is alive and how much memory that takes,
//! [plan] packs those lifetimes into a single buffer and [sched] searches for an order with a low peak:
//! ```no_run
//! # use cl_graph::onnx::load_model_from_path;
//! # use cl_sched::graph::OpGraph;
//! # use cl_sched::life::compute_lifetime;
//! # use cl_sched::plan::best_fit;
//! # use cl_sched::sched::hierarchical_schedule;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let model = load_model_from_path("darts.onnx")?;
//! let graph = OpGraph::from_model_with_batch(&model, Some(1))?;
//!
//! let schedule = hierarchical_schedule(&graph, &Default::default());
//! let plan = best_fit(&compute_lifetime(&graph, &schedule.ops));
//! println!("peak {}, planned {}", schedule.peak, plan.peak);
//! # Ok(())
//! # }
//! ```

pub mod dom;
pub mod graph;
pub mod hier;
pub mod life;
pub mod mem;
pub mod order;
pub mod pass;
pub mod plan;
pub mod result;
pub mod sched;
