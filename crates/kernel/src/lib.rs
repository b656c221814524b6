//! The Engram memory kernel.
//!
//! One [`Kernel`] value owns the store, vector index and providers, and
//! exposes every operation the transports call: capability-gated writes
//! through staging, dual retrieval with masking, the sleep cycle, and the
//! cross-agent handoff bus. Constructed once at startup and threaded
//! explicitly — no global state.

pub mod blocking;
pub mod decay;
pub mod digest;
pub mod distill;
pub mod extract;
pub mod forgetting;
pub mod handoff;
mod kernel;
pub mod policy;
pub mod profile;
pub mod quota;
pub mod refs;
pub mod retrieval;
pub mod scene;
pub mod sessions;
pub mod sleep;
pub mod staging;

pub use kernel::{Kernel, UpdateMemoryRequest};
pub use sessions::{RequestContext, SessionCreateRequest, SessionCreated};
