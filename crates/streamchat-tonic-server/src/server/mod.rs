//! Server internals.
//!
//! ## Structure
//!
//! - [`config`] - CLI/env configuration and validation.
//! - [`engine`] - the call-lifecycle core: dispatch loop, handler registry,
//!   call state machines, chat session and room directory.
//! - [`service`] - the tonic service entry points bridging gRPC calls into
//!   the engine.
//! - [`telemetry`] - console logging setup.

pub mod config;
pub mod engine;
pub mod service;
pub mod telemetry;
