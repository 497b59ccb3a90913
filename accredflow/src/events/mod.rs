//! Lifecycle events for observability.
//!
//! The orchestrator and stage executor report progress through an
//! [`EventSink`]. Events are fire-and-forget: a sink can never fail an
//! execution.

mod event;
mod sink;

pub use event::PipelineEvent;
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
