//! Call session negotiation.
//!
//! - [`CallEngine`]: owns the session state machine and runs on its own task
//! - `worker`: one task per session that owns the peer connection
//! - `handler`: feeds signaling channel events into the engine

mod engine;
mod handler;
mod worker;

pub use engine::{CallEngine, Command};
