//! Logging for overlay binaries.
//!
//! Binaries flatten [`LogArgs`] into their CLI and call [`init_logging`] once
//! at startup.

mod args;
mod logging;

pub use args::LogArgs;
pub use logging::{env_filter, init_logging};
