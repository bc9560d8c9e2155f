//! Typed event stream for front-ends
//!
//! Every observable step of a research or ingestion run is emitted as an
//! [`AgentEvent`] through an [`EventEmitter`]. Delivery is synchronous on
//! the emitting thread; there is no buffering and no backpressure.

mod emitter;
mod types;

pub use emitter::{EventCallback, EventEmitter};
pub use types::{AgentEvent, PlannedTaskSummary};
