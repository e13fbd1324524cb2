pub mod calls;
pub mod client;
pub mod config;
pub mod error;
pub mod platform;
pub mod signaling;
pub mod transport;
pub mod ui;

pub use calls::{CallEngine, Command};
pub use client::Client;
pub use config::ClientConfig;
pub use error::SignalingError;

pub use callcore;
