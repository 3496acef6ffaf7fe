//! In-process job queue.
//!
//! [`local::LocalQueue`] implements the core `JobQueue` port with a ready
//! deque and a time-ordered schedule; [`worker::Worker`] pulls jobs from it,
//! runs them through the runtime bridge and applies the retry policy.

pub mod local;
pub mod worker;
