//! # Stage and Wire Framework
//!
//! The scheduling substrate every pipeline stage is built on.
//!
//! ## Architecture
//!
//! - A **stage** is `{input queue, worker policy, handler fn, named
//!   outputs}`. Worker policies: sequential, sequential-thread,
//!   concurrent, direct-inline ([`stage`]).
//! - A **wire** solders one stage's output to another's input, either
//!   respecting backpressure ([`wire::Wire::solder_to`]) or bypassing it
//!   for control edges ([`inject::InjectWire::solder_inject`],
//!   [`window_broadcast`]).
//! - A [`backpressure::BackpressureObjectCounter`] spans stage pairs
//!   whose queues cannot back-pressure each other directly.
//! - [`flush::FlushCoordinator`] walks a precomputed topological order
//!   to implement `flushIntakePipeline`.
//!
//! Cycles in the stage graph are legal only across inject edges.

pub mod backpressure;
pub mod flush;
pub mod inject;
pub mod pending;
pub mod stage;
pub mod wire;
pub mod window_broadcast;

pub use backpressure::{BackpressureObjectCounter, CapacityPermit};
pub use flush::FlushCoordinator;
pub use inject::InjectWire;
pub use pending::PendingTracker;
pub use stage::{spawn_concurrent, spawn_sequential, spawn_sequential_thread, StageHandle, WorkerPolicy};
pub use wire::{SolderError, Wire};
pub use window_broadcast::{WindowPublisher, WindowReader};

/// Current wire-format/protocol version, shared with `ep-types`.
pub const PROTOCOL_VERSION: u16 = ep_types::PROTOCOL_VERSION;

/// Default bounded-queue capacity for stages not otherwise configured,
/// overridable by `PipelineConfig::wiring::default_queue_capacity`.
pub const DEFAULT_QUEUE_CAPACITY: usize = 2_000;
