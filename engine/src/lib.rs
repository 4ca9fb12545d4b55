//! The replication engine: bounded in-memory working set, protocol
//! handler, and periodic scheduler (components C, D, E) wired onto the
//! durable tables and the gossip-overlay collaborator.

pub mod engine;
pub mod error;
pub mod handler;
pub mod scheduler;
pub mod working_set;

pub use engine::Engine;
pub use error::EngineError;
pub use scheduler::{SchedulerConfig, SchedulerHandle};
pub use working_set::{BoundedMap, PendingPartRequest, WorkingSet, WORKING_SET_CAP};
