//! The pipeline scheduling engine.
//!
//! Data flows through a chain of stages, each owning a worker thread
//! (except stage 0, which the caller drives). Stages are connected by
//! bounded queues; a condvar-backed notifier per stage replaces busy
//! polling, and the items form a ring along which the exit notification
//! propagates at shutdown.
//!
//! ```text
//! caller ──run()──► [stage 0] ──queue──► [stage 1] ──queue──► [stage 2]
//!    ▲                                                            │
//!    └───────────── final outputs (sink queue) ◄──────────────────┘
//! ```

pub mod executor;
pub mod item;
pub mod notify;
pub mod queue;
pub mod route;

pub use executor::PipelineExecutor;
pub use item::{EngineEvent, RuntimeItem};
pub use notify::StageNotifier;
pub use queue::BoundedQueue;
pub use route::{OutputBatch, RoutingTable, Target};
