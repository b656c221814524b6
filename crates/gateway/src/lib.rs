//! HTTP gateway for the Engram memory kernel: the `/v1` REST surface,
//! auth middleware and the background sleep worker.

pub mod api;
pub mod bootstrap;
pub mod state;
