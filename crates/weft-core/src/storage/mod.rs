//! Storage abstractions for weft.
//!
//! Defines the shared key-value store used for barriers and externalized
//! continuations, and the auxiliary workflow memory layered on top of it.
//! Implementations live in weft-infra.

pub mod memory;
pub mod store;
