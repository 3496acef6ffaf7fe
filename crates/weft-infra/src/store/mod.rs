//! Shared store implementations.
//!
//! [`memory::InMemoryStore`] serves single-process deployments and tests; the
//! SQLite store in [`crate::sqlite`] persists across restarts.

pub mod memory;
