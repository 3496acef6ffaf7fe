//! Task dispatch: handlers, the name-to-handler registry and typed tasks.

pub mod handler;
pub mod registry;
pub mod typed;
