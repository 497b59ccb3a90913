//! Cooperative cancellation of a running execution.

mod token;

pub use token::CancellationToken;
