//! # stagepipe: pipeline-parallel executor for chained compute stages
//!
//! Schedules a directed chain of independently-compiled computation
//! modules ("stages"), each potentially bound to a different execution
//! device, so that successive inputs flow through the chain with
//! stage-level pipeline parallelism: while stage N processes input batch
//! K, stage N-1 can already process batch K+1.
//!
//! ## Architecture
//!
//! - **Stages**: opaque compute units behind the [`StageModule`] trait —
//!   the engine only sets inputs, runs, and reads outputs.
//! - **Scheduling**: one OS thread per stage except stage 0, which runs on
//!   the caller's thread. Workers block on condvar notifiers, never spin.
//! - **Transport**: one bounded FIFO queue per chain edge; a full queue
//!   blocks the upstream push, which is the only backpressure mechanism.
//! - **Routing**: a dependency table (validated at init) maps every stage
//!   output to downstream input slots or final output slots; fan-out
//!   shares tensor payloads instead of copying.
//! - **Shutdown**: cooperative; one exit notification propagates around
//!   the item ring, every worker drains and joins, buffered final outputs
//!   stay pollable.
//!
//! ## Example
//!
//! ```
//! use stagepipe::{DependencyConfig, FnStage, PipelineExecutor, StageModule, Tensor};
//!
//! fn scale(factor: f32) -> Box<dyn StageModule> {
//!     Box::new(FnStage::new("scale", 1, 1, move |inputs| {
//!         let out = inputs[0].data().iter().map(|v| v * factor).collect();
//!         Ok(vec![Tensor::from_vec(out)])
//!     }))
//! }
//!
//! let config = DependencyConfig::new().depend(0, 0, 1, 0);
//! let pipeline = PipelineExecutor::new(vec![scale(2.0), scale(10.0)], config).unwrap();
//!
//! pipeline.set_input(0, Tensor::from_vec(vec![1.0, 2.0])).unwrap();
//! pipeline.run().unwrap();
//!
//! let outputs = pipeline.get_output(true).unwrap().unwrap();
//! assert_eq!(outputs[0].data(), &[20.0, 40.0]);
//! pipeline.stop();
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod stage;
pub mod tensor;

// Re-export commonly used types
pub use config::{Dependent, DependencyConfig, ExecutorOptions, OutputDependencies, StageDependencies};
pub use engine::{BoundedQueue, OutputBatch, PipelineExecutor};
pub use error::{PipelineError, Result};
pub use stage::{FnStage, StageFn, StageModule};
pub use tensor::Tensor;
