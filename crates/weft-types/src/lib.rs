//! Shared domain types for weft.
//!
//! This crate contains the types that flow between the engine, the runtime
//! bridge and the infrastructure adapters: the workflow model, continuation
//! stacks, job payloads, configuration and the cross-layer error enums.
//!
//! Zero infrastructure dependencies -- only serde, uuid, thiserror.

pub mod config;
pub mod continuation;
pub mod error;
pub mod job;
pub mod workflow;
