//! Workflow execution: reduction of DAGs into jobs, fan-in barriers and the
//! per-job runtime bridge that resumes parked continuations.

pub mod barrier;
pub mod bridge;
pub mod codec;
pub mod context;
pub mod continuation;
pub mod engine;
