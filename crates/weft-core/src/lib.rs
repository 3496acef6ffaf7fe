//! Workflow engine and port definitions for weft.
//!
//! This crate defines the "ports" (shared store, job queue, memory) that the
//! infrastructure layer implements, plus everything that runs on top of them:
//! the continuation codec, the completion barrier, the run engine and the
//! runtime bridge invoked around every job. It depends only on `weft-types`
//! -- never on `weft-infra` or any database/IO crate.

pub mod queue;
pub mod storage;
pub mod task;
pub mod template;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;
