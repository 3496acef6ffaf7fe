//! Infrastructure implementations for weft.
//!
//! Adapters for the ports defined in `weft-core`: an in-process shared store,
//! a SQLite shared store, an in-process scheduled job queue with its worker
//! pool, and configuration file loading.

pub mod config;
pub mod queue;
pub mod sqlite;
pub mod store;
