//! Transport implementations.
//!
//! This module contains concrete implementations of the [`Transport`](crate::transport::Transport)
//! trait for different queue backends.

pub mod memory;
pub mod spool;

pub use memory::MemoryTransport;
pub use spool::SpoolTransport;
