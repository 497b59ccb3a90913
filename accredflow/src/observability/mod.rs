//! Logging setup and timing helpers.

mod logging;
mod timer;

pub use logging::{init_tracing, LogFormat, LoggingConfig};
pub use timer::SpanTimer;
