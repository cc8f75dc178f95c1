//! Observability: structured logging via `tracing`.
//!
//! The subscriber is configured from `[observability.logging]`; `RUST_LOG`
//! overrides the configured level and filter directives.

mod tracing_init;

pub use tracing_init::*;
