//! Shared domain types for the Engram memory kernel.
//!
//! Everything here is plain data: records mirroring the persisted tables,
//! the capability/scope vocabulary, the error taxonomy, and the immutable
//! [`config::Config`] built once from environment variables. No I/O.

pub mod capability;
pub mod config;
pub mod digest;
pub mod error;
pub mod handoff;
pub mod memory;
pub mod scene;
pub mod session;
pub mod staging;

pub use capability::Capability;
pub use error::{Error, Result};
pub use memory::{
    ConfidentialityScope, MemoryLayer, MemoryRecord, MemoryStatus, MemoryType, Sensitivity,
};
