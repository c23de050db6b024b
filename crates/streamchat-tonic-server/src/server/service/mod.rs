//! gRPC service entry points.
//!
//! The tonic services own no call state. Each incoming call is wrapped into
//! a call record and offered to the dispatch engine through the matching
//! intake queue; the engine's handlers drive the call from there.
//!
//! ## Structure
//!
//! - [`greeter`] - the `MultiGreeter` service (`SayHello`).
//! - [`chat`] - the `ChatRoom` service (`Chat`, `ListUsers`).

pub mod chat;
pub mod greeter;
