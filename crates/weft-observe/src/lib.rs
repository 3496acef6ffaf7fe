//! Observability setup for weft binaries.

pub mod tracing_setup;
